// # discovery-core
//
// Core library for pluggable scrape-target discovery.
//
// ## Architecture Overview
//
// This library provides the pieces every discovery backend shares:
// - **TargetGroup / LabelSet**: The data exchanged between backends and their consumer
// - **Discoverer**: Trait for a single fetch-and-extract pass against an inventory
// - **Discovery**: Poll engine that drives a Discoverer on a fixed cadence
// - **DiscovererRegistry**: Plugin-based registry for backend factories
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Backends only fetch and extract, the engine schedules
// 2. **Independent Instances**: One Discovery per configured source, no shared state
// 3. **Plugin-Based**: Backends are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Error Tolerance**: A failed poll is logged and retried on the next tick only

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod target;
pub mod traits;

// Re-export core types for convenience
pub use config::DiscoveryConfig;
pub use engine::{Discovery, DiscoveryEvent, StopHandle};
pub use error::{Error, Result};
pub use registry::DiscovererRegistry;
pub use target::{LabelSet, TargetGroup};
pub use traits::{Discoverer, DiscovererFactory};
