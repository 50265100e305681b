//! Test doubles and common utilities for discovery contract tests
//!
//! These doubles stand in for real inventories so the tests can control
//! exactly what each poll cycle returns.

#![allow(dead_code)]

use discovery_core::error::{Error, Result};
use discovery_core::{Discoverer, Discovery, DiscoveryEvent, LabelSet, StopHandle, TargetGroup};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const INTERVAL: Duration = Duration::from_secs(60);

/// What a single refresh() call does
pub enum Step {
    /// Return these targets under the discoverer's source
    Targets(Vec<LabelSet>),
    /// Fail the upstream listing
    Fail(&'static str),
    /// Never complete
    Hang,
    /// Return a group under a different source
    Foreign(&'static str),
}

/// A discoverer that replays a script, then repeats its fallback targets
pub struct ScriptedDiscoverer {
    source: String,
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Vec<LabelSet>,
    refresh_calls: Arc<AtomicUsize>,
}

impl ScriptedDiscoverer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Vec::new(),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Targets returned whenever the script is exhausted
    pub fn with_fallback(mut self, targets: Vec<LabelSet>) -> Self {
        self.fallback = targets;
        self
    }

    /// Queue the next refresh() behaviour
    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    /// Shared view of the refresh() call counter
    pub fn counter(&self) -> RefreshCounter {
        RefreshCounter(Arc::clone(&self.refresh_calls))
    }
}

#[async_trait::async_trait]
impl Discoverer for ScriptedDiscoverer {
    fn mechanism(&self) -> &'static str {
        "scripted"
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source.clone()]
    }

    async fn refresh(&self) -> Result<TargetGroup> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(TargetGroup::new(self.source.clone(), self.fallback.clone())),
            Some(Step::Targets(targets)) => Ok(TargetGroup::new(self.source.clone(), targets)),
            Some(Step::Fail(message)) => Err(Error::http(message)),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Foreign(source)) => Ok(TargetGroup::empty(source)),
        }
    }
}

/// Counts refresh() calls of a discoverer that has been moved into a Discovery
#[derive(Clone)]
pub struct RefreshCounter(Arc<AtomicUsize>);

impl RefreshCounter {
    pub fn refresh_calls(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn target(address: &str) -> LabelSet {
    LabelSet::with_address(address)
}

/// A started discovery with everything a test needs to drive it
pub struct Running {
    pub output: mpsc::Receiver<TargetGroup>,
    pub events: mpsc::Receiver<DiscoveryEvent>,
    pub stop: StopHandle,
    pub task: JoinHandle<()>,
    pub counter: RefreshCounter,
}

/// Start a discovery with a capacity-1 output stream and an observer
pub fn start(discoverer: ScriptedDiscoverer) -> Running {
    let counter = discoverer.counter();
    let (events_tx, events) = mpsc::channel(64);
    let (discovery, stop) =
        Discovery::new(Box::new(discoverer), INTERVAL).expect("discovery construction succeeds");
    let discovery = discovery.with_observer(events_tx);

    let (tx, output) = mpsc::channel(1);
    let task = tokio::spawn(discovery.run(tx));

    Running {
        output,
        events,
        stop,
        task,
        counter,
    }
}

/// Drain all currently buffered observer events
pub fn drain_events(events: &mut mpsc::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
