// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer service driving delayed link release.
//!
//! Scheduling and cancelling are non-blocking requests. Callbacks run on the
//! timer's own thread (or the test thread for [`ManualTimer`]) with no timer
//! lock held, so they may take a link's lock.
//!
//! Cancellation contract: once `cancel` returns `true`, the callback will not
//! run. A `false` return means it already ran, is running, or never existed.

use crate::config::TIMER_THREAD_NAME;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One-shot callback run when a deadline passes.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by [`TimerService::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Reactor/timer abstraction used by links.
pub trait TimerService: Send + Sync {
    /// Run `callback` once `deadline` has passed.
    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerHandle;

    /// Disarm a scheduled callback.
    ///
    /// # Returns
    /// `true` if the callback was still pending and will now never run
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Clock the deadlines are measured against.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ============================================================================
// ReactorTimer
// ============================================================================

enum TimerCommand {
    Schedule { id: u64, deadline: Instant },
}

struct ReactorShared {
    next_id: AtomicU64,
    /// Armed callbacks; `cancel` removes from here, the thread takes from here.
    pending: Mutex<HashMap<u64, TimerCallback>>,
}

impl ReactorShared {
    fn take(&self, id: u64) -> Option<TimerCallback> {
        self.pending.lock().remove(&id)
    }
}

/// Background-thread timer.
///
/// Requests travel over a crossbeam channel; the thread keeps deadlines in a
/// min-heap and sleeps on `recv_timeout` until the next one.
pub struct ReactorTimer {
    shared: Arc<ReactorShared>,
    /// Dropping the sender disconnects the channel and stops the thread.
    commands: Mutex<Option<Sender<TimerCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReactorTimer {
    /// Spawn the timer thread.
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(ReactorShared {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = channel::unbounded::<TimerCommand>();
        let thread_shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new()
            .name(TIMER_THREAD_NAME.into())
            .spawn(move || {
                let mut deadlines: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
                loop {
                    let now = Instant::now();
                    while let Some(Reverse((deadline, id))) = deadlines.peek().copied() {
                        if deadline > now {
                            break;
                        }
                        deadlines.pop();
                        // Cancelled entries were already removed from `pending`.
                        if let Some(callback) = thread_shared.take(id) {
                            callback();
                        }
                    }

                    let received = match deadlines.peek() {
                        Some(Reverse((deadline, _))) => {
                            rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                        }
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match received {
                        Ok(TimerCommand::Schedule { id, deadline }) => {
                            deadlines.push(Reverse((deadline, id)));
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let dropped = thread_shared.pending.lock().drain().count();
                if dropped > 0 {
                    log::debug!("[ReactorTimer] exiting with {} armed timer(s) dropped", dropped);
                }
            })?;

        Ok(Self {
            shared,
            commands: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Number of armed callbacks.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Stop the timer thread; armed callbacks are dropped without running.
    ///
    /// Safe to call multiple times, and from a timer callback.
    pub fn shutdown(&self) {
        drop(self.commands.lock().take());
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // Called from a callback; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                log::error!("[ReactorTimer::shutdown] timer thread panicked");
            }
        }
    }
}

impl TimerService for ReactorTimer {
    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.lock().insert(id, callback);

        let sent = self
            .commands
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(TimerCommand::Schedule { id, deadline }).is_ok());
        if !sent {
            self.shared.take(id);
            log::warn!("[ReactorTimer::schedule] timer stopped, request {} dropped", id);
        }
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.shared.take(handle.0).is_some()
    }
}

impl Drop for ReactorTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// ManualTimer
// ============================================================================

struct ManualState {
    now: Instant,
    next_id: u64,
    armed: HashMap<u64, (Instant, TimerCallback)>,
}

/// Deterministic timer driven by [`advance`](ManualTimer::advance).
///
/// Keeps a virtual clock; callbacks run on the thread calling `advance`.
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                next_id: 1,
                armed: HashMap::new(),
            }),
        }
    }

    /// Move the virtual clock forward and run everything now due.
    ///
    /// # Returns
    /// Number of callbacks run
    pub fn advance(&self, by: Duration) -> usize {
        self.state.lock().now += by;
        self.fire_due()
    }

    /// Run every callback whose deadline is at or before the virtual clock.
    pub fn fire_due(&self) -> usize {
        let due = {
            let mut state = self.state.lock();
            let now = state.now;
            let mut ids: Vec<(Instant, u64)> = state
                .armed
                .iter()
                .filter(|(_, (deadline, _))| *deadline <= now)
                .map(|(id, (deadline, _))| (*deadline, *id))
                .collect();
            ids.sort_unstable();
            ids.into_iter()
                .filter_map(|(_, id)| state.armed.remove(&id).map(|(_, cb)| cb))
                .collect::<Vec<_>>()
        };
        let count = due.len();
        for callback in due {
            callback();
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().armed.len()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.armed.insert(id, (deadline, callback));
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.state.lock().armed.remove(&handle.0).is_some()
    }

    fn now(&self) -> Instant {
        self.state.lock().now
    }
}
