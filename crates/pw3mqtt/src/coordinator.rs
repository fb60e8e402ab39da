// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Polling coordinator.
//!
//! Serializes every fetch-and-publish cycle on the calling thread.
//!
//! # Architecture
//!
//! ```text
//!  timer thread                      dispatcher (caller of run)
//!  +---------------------+  tick    +-------------------------------+
//!  | wait(poll_interval) |--------->| select_biased!                |
//!  | on RunState condvar |  (1)     |   1. shutdown                 |
//!  +---------------------+          |   2. availability             |
//!        ^  pause/resume/stop       |   3. tick -> PollCycle::poll  |
//!        +--------------------------+-------------------------------+
//! ```
//!
//! The tick channel holds one message: a tick raised while another is still
//! pending is dropped, so slow cycles never pile up.

use crate::error::{BridgeError, Disposition, Result};
use crate::publisher::Availability;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval increase applied each time the gateway rate limits us.
pub const BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Work driven by the coordinator.
pub trait PollCycle {
    /// Downstream became available: announce devices and current state.
    fn announce(&mut self) -> Result<()>;

    /// Timer tick: fetch fresh values and publish them.
    fn poll(&mut self) -> Result<()>;
}

enum Event {
    Shutdown,
    Availability(Availability),
    SourceClosed,
    Tick,
}

#[derive(Debug)]
struct RunState {
    running: bool,
    paused: bool,
    poll_interval: Duration,
    /// Bumped on resume, restarts the timer interval.
    epoch: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RunState>,
    wake: Condvar,
}

impl Shared {
    fn update<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.wake.notify_all();
        result
    }
}

/// Cloneable control surface of a [`PollingCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
    shutdown: Sender<()>,
    ticks: Sender<()>,
}

impl CoordinatorHandle {
    /// Stop the coordinator. Idempotent.
    pub fn stop(&self) {
        self.shared.update(|state| state.running = false);
        // a full channel already carries the request
        let _ = self.shutdown.try_send(());
    }

    /// Request a cycle now, unless one is already pending.
    pub fn poll_now(&self) -> bool {
        match self.ticks.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }

    /// Suppress timer ticks.
    pub fn pause(&self) {
        self.shared.update(|state| state.paused = true);
    }

    /// Resume timer ticks; the interval restarts from now.
    pub fn resume(&self) {
        self.shared.update(|state| {
            if state.paused {
                state.paused = false;
                state.epoch += 1;
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.state.lock().poll_interval
    }

    /// Lengthen the poll interval, returning the new value.
    pub fn extend_interval(&self, by: Duration) -> Duration {
        self.shared.update(|state| {
            state.poll_interval += by;
            state.poll_interval
        })
    }
}

/// Timer plus single-threaded event dispatcher.
pub struct PollingCoordinator {
    handle: CoordinatorHandle,
    shutdown: Receiver<()>,
    ticks: Receiver<()>,
    availability: Receiver<Availability>,
}

impl PollingCoordinator {
    pub fn new(poll_interval: Duration, availability: Receiver<Availability>) -> Self {
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let (tick_tx, tick_rx) = channel::bounded(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(RunState {
                running: true,
                paused: false,
                poll_interval,
                epoch: 0,
            }),
            wake: Condvar::new(),
        });

        Self {
            handle: CoordinatorHandle {
                shared,
                shutdown: shutdown_tx,
                ticks: tick_tx,
            },
            shutdown: shutdown_rx,
            ticks: tick_rx,
            availability,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Dispatch events until stopped or a fatal error occurs.
    ///
    /// The timer thread is joined before returning.
    pub fn run<C: PollCycle + ?Sized>(self, cycle: &mut C) -> Result<()> {
        let timer = self.spawn_timer()?;

        let result = self.dispatch(cycle);

        self.handle.stop();
        if timer.join().is_err() {
            error!("Timer thread panicked");
        }
        result
    }

    fn spawn_timer(&self) -> Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.handle.shared);
        let ticks = self.handle.ticks.clone();
        std::thread::Builder::new()
            .name("pw3mqtt-timer".into())
            .spawn(move || timer_loop(&shared, &ticks))
            .map_err(|e| BridgeError::Fatal(format!("failed to spawn timer thread: {}", e)))
    }

    fn dispatch<C: PollCycle + ?Sized>(&self, cycle: &mut C) -> Result<()> {
        let mut availability = self.availability.clone();

        loop {
            let event = channel::select_biased! {
                recv(self.shutdown) -> _ => Event::Shutdown,
                recv(availability) -> msg => match msg {
                    Ok(status) => Event::Availability(status),
                    Err(_) => Event::SourceClosed,
                },
                recv(self.ticks) -> _ => Event::Tick,
            };

            match event {
                Event::Shutdown => {
                    info!("Received shutdown signal");
                    return Ok(());
                }
                Event::Availability(Availability::Online) => {
                    info!("Home Assistant is online");
                    let result = cycle.announce();
                    self.handle.resume();
                    self.settle(result)?;
                }
                Event::Availability(Availability::Offline) => {
                    info!("Home Assistant is offline, pausing updates");
                    self.handle.pause();
                }
                Event::SourceClosed => {
                    warn!("Availability source closed");
                    availability = channel::never();
                }
                Event::Tick if self.handle.is_running() => {
                    debug!("Processing update from timer");
                    let result = cycle.poll();
                    self.settle(result)?;
                }
                Event::Tick => {}
            }
        }
    }

    /// Apply the failure policy to a cycle result.
    fn settle(&self, result: Result<()>) -> Result<()> {
        let Err(e) = result else {
            return Ok(());
        };

        match e.disposition() {
            Disposition::Backoff => {
                let interval = self.handle.extend_interval(BACKOFF_STEP);
                warn!("{}", e);
                warn!("Increasing poll interval by 1s to {:?}", interval);
                Ok(())
            }
            Disposition::Skip => {
                warn!("Skipping update: {}", e);
                Ok(())
            }
            Disposition::Fatal => {
                error!("Fatal error: {}", e);
                Err(e)
            }
            Disposition::Continue => {
                error!("Update failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Emit one tick per full interval while not paused.
fn timer_loop(shared: &Shared, ticks: &Sender<()>) {
    let mut state = shared.state.lock();

    'interval: while state.running {
        let epoch = state.epoch;
        let deadline = Instant::now() + state.poll_interval;

        // woken early by pause, resume or stop
        while !shared.wake.wait_until(&mut state, deadline).timed_out() {
            if !state.running {
                break 'interval;
            }
            if state.epoch != epoch {
                continue 'interval;
            }
        }

        if state.running && !state.paused {
            // full channel: a tick is already pending
            let _ = ticks.try_send(());
        }
    }
    debug!("Timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl PollCycle for Idle {
        fn announce(&mut self) -> Result<()> {
            Ok(())
        }

        fn poll(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let (_tx, rx) = channel::unbounded();
        let coordinator = PollingCoordinator::new(Duration::from_secs(30), rx);
        let handle = coordinator.handle();

        handle.pause();
        handle.pause();
        assert!(handle.is_paused());
        let epoch = handle.shared.state.lock().epoch;

        handle.resume();
        handle.resume();
        assert!(!handle.is_paused());
        assert_eq!(handle.shared.state.lock().epoch, epoch + 1);
    }

    #[test]
    fn test_poll_now_coalesces() {
        let (_tx, rx) = channel::unbounded();
        let coordinator = PollingCoordinator::new(Duration::from_secs(30), rx);
        let handle = coordinator.handle();

        assert!(handle.poll_now());
        assert!(!handle.poll_now());
        assert_eq!(coordinator.ticks.len(), 1);
    }

    #[test]
    fn test_extend_interval() {
        let (_tx, rx) = channel::unbounded();
        let coordinator = PollingCoordinator::new(Duration::from_secs(30), rx);
        let handle = coordinator.handle();

        assert_eq!(handle.extend_interval(BACKOFF_STEP), Duration::from_secs(31));
        assert_eq!(handle.poll_interval(), Duration::from_secs(31));
    }

    #[test]
    fn test_stop_before_run_returns() {
        let (_tx, rx) = channel::unbounded();
        let coordinator = PollingCoordinator::new(Duration::from_secs(30), rx);
        let handle = coordinator.handle();

        handle.stop();
        handle.stop();
        assert!(coordinator.run(&mut Idle).is_ok());
        assert!(!handle.is_running());
    }
}
