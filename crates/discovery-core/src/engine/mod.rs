//! Discovery poll engine
//!
//! A [`Discovery`] drives one [`Discoverer`] on a fixed cadence and pushes
//! each successful poll onto an output stream. It is the only place where
//! scheduling, cancellation and emission happen; backends only fetch and
//! extract.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   ticker ──────▶│              │── TargetGroup ──▶ output (mpsc, consumer)
//!                 │  Discovery   │
//!   StopHandle ──▶│              │── DiscoveryEvent ──▶ observer (optional)
//!                 └──────┬───────┘
//!                        │ refresh()
//!                        ▼
//!                 ┌──────────────┐
//!                 │  Discoverer  │── upstream inventory API
//!                 └──────────────┘
//! ```
//!
//! ## Poll Cycle
//!
//! 1. Wait for the next tick or a stop request, whichever comes first
//!    (the first tick fires immediately)
//! 2. Call `Discoverer::refresh()`, racing it against a stop request
//! 3. On error, log and skip emission; the cadence is unaffected
//! 4. Drop targets without an address, reject groups under a foreign source
//! 5. Send the group to the consumer, racing the send against a stop request
//!
//! ## Stopping
//!
//! [`StopHandle::stop`] is a handshake: it returns once the loop has exited
//! and the output stream has been closed. Because every wait in the loop
//! also listens for the stop request, a hung upstream call or a consumer
//! that stopped receiving cannot stall it; the in-flight cycle is abandoned
//! and emits nothing.

use crate::error::{Error, Result};
use crate::target::TargetGroup;
use crate::traits::Discoverer;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Acknowledgement channel handed from [`StopHandle`] to the poll loop
type StopAck = oneshot::Sender<()>;

/// Events emitted by a running Discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Poll loop started
    Started {
        sources: Vec<String>,
    },

    /// A target group was handed to the consumer
    Refreshed {
        source: String,
        targets: usize,
    },

    /// The upstream listing failed, nothing emitted this cycle
    RefreshFailed {
        error: String,
    },

    /// Targets were removed from a group before emission
    TargetsDropped {
        source: String,
        count: usize,
        reason: String,
    },

    /// Poll loop exited and the output stream is closed
    Stopped {
        reason: String,
    },
}

/// Why the poll loop exited
enum Exit {
    /// Stop requested through the handle, with or without acknowledgement
    Stop(Option<StopAck>),
    /// The consumer dropped the receiving side of the output stream
    OutputClosed,
}

/// One running discovery source
///
/// ## Lifecycle
///
/// 1. Create with [`Discovery::new()`], keeping the returned [`StopHandle`]
/// 2. Start with [`Discovery::run()`] (or [`Discovery::spawn()`])
/// 3. Call [`StopHandle::stop()`] to end the loop
///
/// A Discovery is consumed by `run` and cannot be restarted; build a new one
/// to restart discovery.
pub struct Discovery {
    /// Backend performing the actual poll
    discoverer: Box<dyn Discoverer>,

    /// Sources reported by the backend at construction
    sources: Vec<String>,

    /// Time between two polls
    refresh_interval: Duration,

    /// Stop requests from the handle
    stop_rx: oneshot::Receiver<StopAck>,

    /// Event sender for external monitoring
    event_tx: Option<mpsc::Sender<DiscoveryEvent>>,
}

impl Discovery {
    /// Create a new discovery instance
    ///
    /// # Parameters
    ///
    /// - `discoverer`: Backend implementation
    /// - `refresh_interval`: Time between polls, must be non-zero
    ///
    /// # Returns
    ///
    /// A tuple of (discovery, stop_handle)
    pub fn new(
        discoverer: Box<dyn Discoverer>,
        refresh_interval: Duration,
    ) -> Result<(Self, StopHandle)> {
        if refresh_interval.is_zero() {
            return Err(Error::config(format!(
                "{} discovery refresh interval must be > 0",
                discoverer.mechanism()
            )));
        }

        let sources = discoverer.sources();
        let (stop_tx, stop_rx) = oneshot::channel();

        let discovery = Self {
            discoverer,
            sources: sources.clone(),
            refresh_interval,
            stop_rx,
            event_tx: None,
        };

        Ok((discovery, StopHandle { stop_tx, sources }))
    }

    /// Attach an observer that receives [`DiscoveryEvent`]s
    ///
    /// Events are sent with `try_send`; when the observer falls behind,
    /// events are dropped rather than slowing discovery down.
    pub fn with_observer(mut self, event_tx: mpsc::Sender<DiscoveryEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Source identifiers this instance emits under
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Time between two polls
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Run the poll loop until stopped
    ///
    /// Polls once immediately, then once per refresh interval. Exactly one
    /// [`TargetGroup`] is sent per successful poll. `output` is dropped when
    /// this returns, which closes the stream for the consumer.
    ///
    /// Returns when a stop is requested, the [`StopHandle`] is dropped, or the
    /// consumer drops the receiver.
    pub async fn run(self, output: mpsc::Sender<TargetGroup>) {
        let span = info_span!(
            "discovery",
            mechanism = self.discoverer.mechanism(),
            source = %self.sources.join(","),
        );

        self.run_internal(output).instrument(span).await
    }

    /// Spawn the poll loop on the current runtime
    ///
    /// The output stream has capacity 1: the backend blocks on the consumer
    /// instead of queueing stale groups.
    pub fn spawn(self) -> (ReceiverStream<TargetGroup>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(tx));
        (ReceiverStream::new(rx), handle)
    }

    async fn run_internal(mut self, output: mpsc::Sender<TargetGroup>) {
        self.emit_event(DiscoveryEvent::Started {
            sources: self.sources.clone(),
        });
        info!("Discovery started (interval={:?})", self.refresh_interval);

        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;

                ack = &mut self.stop_rx => break Exit::Stop(ack.ok()),
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;

                ack = &mut self.stop_rx => break Exit::Stop(ack.ok()),
                result = self.discoverer.refresh() => result,
            };

            let group = match result {
                Ok(group) => group,
                Err(e) => {
                    error!(
                        "Error refreshing {} targets: {}",
                        self.discoverer.mechanism(),
                        e
                    );
                    self.emit_event(DiscoveryEvent::RefreshFailed {
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(group) = self.admit(group) else {
                continue;
            };

            let source = group.source.clone();
            let targets = group.targets.len();

            tokio::select! {
                biased;

                ack = &mut self.stop_rx => break Exit::Stop(ack.ok()),
                sent = output.send(group) => {
                    if sent.is_err() {
                        break Exit::OutputClosed;
                    }
                }
            }

            debug!("Emitted {} target(s) for {}", targets, source);
            self.emit_event(DiscoveryEvent::Refreshed { source, targets });
        };

        // Close the stream before acknowledging, so a returned stop() implies closure
        drop(output);

        let reason = match &exit {
            Exit::Stop(Some(_)) => "Stop requested",
            Exit::Stop(None) => "Stop handle dropped",
            Exit::OutputClosed => "Output stream closed by consumer",
        };
        info!("Discovery stopped: {}", reason);
        self.emit_event(DiscoveryEvent::Stopped {
            reason: reason.to_string(),
        });

        if let Exit::Stop(Some(ack)) = exit {
            let _ = ack.send(());
        }
    }

    /// Enforce emission invariants on a freshly polled group
    ///
    /// Returns `None` when the whole group must be withheld.
    fn admit(&self, mut group: TargetGroup) -> Option<TargetGroup> {
        if !self.sources.contains(&group.source) {
            let err = Error::discoverer(
                self.discoverer.mechanism(),
                format!(
                    "group for foreign source {:?}, expected one of {:?}",
                    group.source, self.sources
                ),
            );
            error!("Withholding target group: {}", err);
            self.emit_event(DiscoveryEvent::RefreshFailed {
                error: err.to_string(),
            });
            return None;
        }

        let before = group.targets.len();
        group.targets.retain(|target| target.has_address());
        let dropped = before - group.targets.len();

        if dropped > 0 {
            warn!(
                "Dropped {} target(s) without address from {}",
                dropped, group.source
            );
            self.emit_event(DiscoveryEvent::TargetsDropped {
                source: group.source.clone(),
                count: dropped,
                reason: "missing address label".to_string(),
            });
        }

        Some(group)
    }

    /// Emit a discovery event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: DiscoveryEvent) {
        if let Some(tx) = &self.event_tx
            && tx.try_send(event).is_err()
        {
            warn!("Discovery event channel full or closed, dropping event");
        }
    }
}

/// Handle used to stop a running [`Discovery`]
///
/// Consumed by [`StopHandle::stop`], so a stop can be requested at most once.
/// Dropping the handle without calling `stop` also ends the poll loop, but
/// nobody waits for it.
#[derive(Debug)]
pub struct StopHandle {
    stop_tx: oneshot::Sender<StopAck>,
    sources: Vec<String>,
}

impl StopHandle {
    /// Source identifiers of the discovery this handle controls
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Request termination and wait until the poll loop has exited
    ///
    /// An in-flight refresh or output send is abandoned. When this returns,
    /// the output stream has been closed. If the loop already exited (or the
    /// Discovery was dropped without running), returns immediately.
    pub async fn stop(self) {
        let sources = self.sources.join(",");
        debug!("Stopping discovery for {}...", sources);

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).is_err() {
            debug!("Discovery for {} already finished", sources);
            return;
        }

        // Err means the loop was torn down without acknowledging; it is gone either way
        let _ = ack_rx.await;

        debug!("Discovery for {} stopped.", sources);
    }
}
