//! Core traits for the discovery system
//!
//! This module defines the abstract interfaces that all backends must follow.
//!
//! - [`Discoverer`]: Fetch an upstream inventory and extract scrape targets

pub mod discoverer;

pub use discoverer::{Discoverer, DiscovererFactory};
