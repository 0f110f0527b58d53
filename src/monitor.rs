// vecload — monitor.rs
// Memory-pressure backpressure controller. Samples host memory on its own
// thread and broadcasts Paused/Running to every worker's control channel.
// Author: d65v <https://github.com/d65v>

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use sysinfo::System;

use crate::control::{ControlPlane, WorkerState};
use crate::{LoadError, Result};

// ── Memory Probe ──────────────────────────────────────────────────────────────

/// Source of available-to-total memory readings.
pub trait MemoryProbe: Send {
    /// Fraction of host memory currently available, in `[0, 1]`.
    fn available_fraction(&mut self) -> Result<f64>;
}

/// Reads host memory through `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn available_fraction(&mut self) -> Result<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(LoadError::MemorySample(
                "host reported zero total memory".into(),
            ));
        }
        Ok(self.system.available_memory() as f64 / total as f64)
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Pause below this available fraction, resume at or above it
    pub threshold: f64,
    /// Sampling cadence while workers run
    pub normal_interval: Duration,
    /// Sampling cadence while workers are paused
    pub paused_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.10,
            normal_interval: Duration::from_millis(500),
            paused_interval: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pressure {
    Normal,
    Paused,
}

/// The controller state machine plus the channels it drives.
pub struct MemoryMonitor<P: MemoryProbe> {
    config: MonitorConfig,
    probe: P,
    plane: ControlPlane,
    pressure: Pressure,
}

impl<P: MemoryProbe + 'static> MemoryMonitor<P> {
    pub fn new(config: MonitorConfig, probe: P, plane: ControlPlane) -> Self {
        Self {
            config,
            probe,
            plane,
            pressure: Pressure::Normal,
        }
    }

    /// Feed one reading through the state machine. Returns the state to
    /// broadcast when the reading crosses the threshold.
    fn observe(&mut self, fraction: f64) -> Option<WorkerState> {
        match self.pressure {
            Pressure::Normal if fraction < self.config.threshold => {
                self.pressure = Pressure::Paused;
                Some(WorkerState::Paused)
            }
            Pressure::Paused if fraction >= self.config.threshold => {
                self.pressure = Pressure::Normal;
                Some(WorkerState::Running)
            }
            _ => None,
        }
    }

    /// Take one sample and broadcast any resulting transition.
    ///
    /// A failed or non-finite sample is skipped; the next interval retries.
    pub fn tick(&mut self) -> Option<WorkerState> {
        let fraction = match self.probe.available_fraction() {
            Ok(f) if f.is_finite() => f,
            Ok(f) => {
                log::warn!("memory monitor: ignoring non-finite sample {}", f);
                return None;
            }
            Err(e) => {
                log::warn!("memory monitor: sample failed, skipping: {}", e);
                return None;
            }
        };

        log::debug!("memory monitor: available {:.2}%", fraction * 100.0);

        let transition = self.observe(fraction)?;
        match transition {
            WorkerState::Paused => log::warn!(
                "Free memory below threshold ({:.2}%). Pausing workers...",
                fraction * 100.0
            ),
            WorkerState::Running => log::info!(
                "Free memory above threshold ({:.2}%). Resuming workers.",
                fraction * 100.0
            ),
        }

        let summary = self.plane.broadcast(transition);
        log::debug!(
            "memory monitor: '{}' delivered={} replaced={} finished={}",
            transition,
            summary.delivered,
            summary.replaced,
            summary.disconnected
        );
        Some(transition)
    }

    fn interval(&self) -> Duration {
        match self.pressure {
            Pressure::Normal => self.config.normal_interval,
            Pressure::Paused => self.config.paused_interval,
        }
    }

    /// Run on a dedicated thread until the returned handle is stopped or
    /// dropped.
    pub fn spawn(mut self) -> Result<MonitorHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("memory-monitor".into())
            .spawn(move || {
                log::info!(
                    "memory monitor: watching {} workers, threshold {:.2}",
                    self.plane.len(),
                    self.config.threshold
                );
                loop {
                    self.tick();
                    match stop_rx.recv_timeout(self.interval()) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("memory monitor: stopped");
            })
            .map_err(|e| LoadError::Worker(format!("failed to spawn memory monitor: {}", e)))?;

        Ok(MonitorHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Owner handle for a running monitor thread.
pub struct MonitorHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the monitor and wait for its thread to exit.
    pub fn stop(mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("memory monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the monitor; no join here.
        self.stop_tx.take();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::BroadcastMode;
    use std::time::Instant;

    /// Replays a fixed sequence of readings, then repeats the last one.
    struct ScriptedProbe {
        readings: Vec<Result<f64>>,
        next: usize,
    }

    impl ScriptedProbe {
        fn new(fractions: &[f64]) -> Self {
            Self {
                readings: fractions.iter().copied().map(Ok).collect(),
                next: 0,
            }
        }
    }

    impl MemoryProbe for ScriptedProbe {
        fn available_fraction(&mut self) -> Result<f64> {
            let i = self.next.min(self.readings.len() - 1);
            self.next += 1;
            match &self.readings[i] {
                Ok(f) => Ok(*f),
                Err(e) => Err(LoadError::MemorySample(e.to_string())),
            }
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            threshold: 0.10,
            normal_interval: Duration::from_millis(1),
            paused_interval: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_state_machine_single_pause_and_resume() {
        let (plane, _rx) = ControlPlane::new(2, BroadcastMode::Overwrite);
        let mut monitor = MemoryMonitor::new(fast_config(), ScriptedProbe::new(&[1.0]), plane);

        let transitions: Vec<_> = [0.5, 0.05, 0.05, 0.5]
            .iter()
            .map(|f| monitor.observe(*f))
            .collect();

        assert_eq!(
            transitions,
            vec![None, Some(WorkerState::Paused), None, Some(WorkerState::Running)]
        );
    }

    #[test]
    fn test_threshold_is_inclusive_for_resume() {
        let (plane, _rx) = ControlPlane::new(1, BroadcastMode::Overwrite);
        let mut monitor = MemoryMonitor::new(fast_config(), ScriptedProbe::new(&[1.0]), plane);
        assert_eq!(monitor.observe(0.10), None);
        assert_eq!(monitor.observe(0.09), Some(WorkerState::Paused));
        assert_eq!(monitor.observe(0.10), Some(WorkerState::Running));
    }

    #[test]
    fn test_failed_sample_is_skipped() {
        let (plane, receivers) = ControlPlane::new(1, BroadcastMode::Overwrite);
        let probe = ScriptedProbe {
            readings: vec![
                Err(LoadError::MemorySample("boom".into())),
                Ok(f64::NAN),
                Ok(0.01),
            ],
            next: 0,
        };
        let mut monitor = MemoryMonitor::new(fast_config(), probe, plane);

        assert_eq!(monitor.tick(), None);
        assert_eq!(monitor.tick(), None);
        assert_eq!(monitor.tick(), Some(WorkerState::Paused));
        assert_eq!(receivers[0].try_signal(), Some(WorkerState::Paused));
    }

    #[test]
    fn test_interval_tracks_pressure() {
        let (plane, _rx) = ControlPlane::new(1, BroadcastMode::Overwrite);
        let mut monitor = MemoryMonitor::new(fast_config(), ScriptedProbe::new(&[1.0]), plane);
        assert_eq!(monitor.interval(), Duration::from_millis(1));
        monitor.observe(0.0);
        assert_eq!(monitor.interval(), Duration::from_millis(2));
    }

    #[test]
    fn test_spawned_monitor_pauses_then_resumes_once() {
        let (plane, receivers) = ControlPlane::new(3, BroadcastMode::Blocking);
        let probe = ScriptedProbe::new(&[0.5, 0.05, 0.05, 0.5]);
        let handle = MemoryMonitor::new(fast_config(), probe, plane).spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        for rx in &receivers {
            let mut seen = Vec::new();
            while seen.last() != Some(&WorkerState::Running) {
                assert!(Instant::now() < deadline, "monitor never resumed");
                match rx.try_signal() {
                    Some(state) => seen.push(state),
                    None => std::thread::sleep(Duration::from_millis(1)),
                }
            }
            assert_eq!(seen, vec![WorkerState::Paused, WorkerState::Running]);
        }

        // The script is exhausted at 0.5: no further transitions.
        std::thread::sleep(Duration::from_millis(20));
        for rx in &receivers {
            assert_eq!(rx.try_signal(), None);
        }
        handle.stop();
    }
}
