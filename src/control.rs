// vecload — control.rs
// Per-worker control channels carrying Running/Paused transitions from the
// memory monitor (single writer) to each worker (single reader).
// Author: d65v <https://github.com/d65v>

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

use crate::LoadError;

/// Capacity of every control channel.
pub const CONTROL_CAPACITY: usize = 1;

// ── States ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Paused,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Paused => "paused",
        })
    }
}

/// How the monitor delivers a state change into a full channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    /// Replace the undelivered message with the newer one. Never blocks.
    Overwrite,
    /// Block until the worker drains its channel. One slow worker stalls
    /// delivery to every worker after it.
    Blocking,
}

impl FromStr for BroadcastMode {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "blocking" => Ok(Self::Blocking),
            other => Err(LoadError::Config(format!(
                "unknown broadcast mode '{}' (expected overwrite | blocking)",
                other
            ))),
        }
    }
}

// ── Sender side ───────────────────────────────────────────────────────────────

/// Outcome of delivering one state change to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// An undelivered message was discarded in favour of the new one.
    Replaced(WorkerState),
    /// The worker has finished and dropped its receiver.
    Disconnected,
}

struct ControlSender {
    worker_id: usize,
    tx: Sender<WorkerState>,
    /// Only held in overwrite mode; a second receiver would otherwise keep a
    /// finished worker's channel open for blocking sends.
    drain: Option<Receiver<WorkerState>>,
    alive: Arc<AtomicBool>,
}

impl ControlSender {
    fn deliver(&self, state: WorkerState) -> Delivery {
        if !self.alive.load(Ordering::Acquire) {
            return Delivery::Disconnected;
        }

        let drain = match &self.drain {
            None => {
                return match self.tx.send(state) {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Disconnected,
                };
            }
            Some(drain) => drain,
        };

        match self.tx.try_send(state) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
            Err(TrySendError::Full(state)) => {
                // The worker may drain concurrently, so the stale slot can
                // already be empty here.
                let stale = drain.try_recv().ok();
                match self.tx.try_send(state) {
                    Ok(()) => stale.map_or(Delivery::Delivered, Delivery::Replaced),
                    Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
                    Err(TrySendError::Full(_)) => {
                        log::warn!(
                            "control: worker {} channel refilled during overwrite, dropping '{}'",
                            self.worker_id,
                            state
                        );
                        Delivery::Replaced(state)
                    }
                }
            }
        }
    }
}

// ── Receiver side ─────────────────────────────────────────────────────────────

/// A worker's end of its control channel.
pub struct ControlReceiver {
    worker_id: usize,
    rx: Receiver<WorkerState>,
    alive: Arc<AtomicBool>,
}

impl ControlReceiver {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Non-blocking check for a pending transition.
    pub fn try_signal(&self) -> Option<WorkerState> {
        match self.rx.try_recv() {
            Ok(state) => Some(state),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a `Running` message arrives, consuming any further
    /// `Paused` messages on the way.
    ///
    /// Returns early if the monitor has gone away, since nothing can resume
    /// or pause the worker after that.
    pub fn await_resume(&self) {
        loop {
            match self.rx.recv() {
                Ok(WorkerState::Running) => return,
                Ok(WorkerState::Paused) => {
                    log::info!("Worker {} waiting to resume...", self.worker_id);
                }
                Err(_) => {
                    log::warn!(
                        "Worker {}: control channel closed while paused, resuming",
                        self.worker_id
                    );
                    return;
                }
            }
        }
    }
}

impl Drop for ControlReceiver {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

// ── Control Plane ─────────────────────────────────────────────────────────────

/// Tally of one broadcast across all workers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub replaced: usize,
    pub disconnected: usize,
}

/// Owns the writing end of every worker's control channel.
pub struct ControlPlane {
    senders: Vec<ControlSender>,
    mode: BroadcastMode,
}

impl ControlPlane {
    /// Build one channel per worker. Receivers are returned in worker order
    /// and must be handed to the worker with the matching index.
    pub fn new(num_workers: usize, mode: BroadcastMode) -> (Self, Vec<ControlReceiver>) {
        let mut senders = Vec::with_capacity(num_workers);
        let mut receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = bounded(CONTROL_CAPACITY);
            let alive = Arc::new(AtomicBool::new(true));
            let drain = match mode {
                BroadcastMode::Overwrite => Some(rx.clone()),
                BroadcastMode::Blocking => None,
            };
            senders.push(ControlSender {
                worker_id,
                tx,
                drain,
                alive: alive.clone(),
            });
            receivers.push(ControlReceiver {
                worker_id,
                rx,
                alive,
            });
        }

        (Self { senders, mode }, receivers)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    /// Send `state` to every worker, in worker order.
    pub fn broadcast(&self, state: WorkerState) -> BroadcastSummary {
        let mut summary = BroadcastSummary::default();
        for sender in &self.senders {
            match sender.deliver(state) {
                Delivery::Delivered => summary.delivered += 1,
                Delivery::Replaced(stale) => {
                    log::debug!(
                        "control: worker {} had undelivered '{}', replaced with '{}'",
                        sender.worker_id,
                        stale,
                        state
                    );
                    summary.replaced += 1;
                }
                Delivery::Disconnected => summary.disconnected += 1,
            }
        }
        summary
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
