// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Asynchronous link cleanup.
//!
//! A forcibly released link still has local endpoints that think they are
//! associated through it. Telling them can re-enter the registry and take a
//! while, so it is done off the caller's thread by a single worker fed over a
//! bounded crossbeam channel. The worker holds its `Arc<Link>` only for the
//! duration of the cleanup.

use crate::config::CLEANUP_THREAD_NAME;
use crate::link::Link;
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Stops the worker on drop: the sender goes first, then the join.
struct Worker {
    queue: Option<Sender<Arc<Link>>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn stop(&mut self) {
        drop(self.queue.take());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[LinkCleanupTask::shutdown] cleanup thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background worker detaching local endpoints from released links.
pub struct LinkCleanupTask {
    worker: Mutex<Option<Worker>>,
    cleaned: Arc<AtomicUsize>,
}

impl LinkCleanupTask {
    /// Spawn the worker with a queue of `capacity` links.
    pub fn start(capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<Arc<Link>>(capacity.max(1));
        let cleaned = Arc::new(AtomicUsize::new(0));
        let thread_cleaned = Arc::clone(&cleaned);

        let thread = std::thread::Builder::new()
            .name(CLEANUP_THREAD_NAME.into())
            .spawn(move || {
                // Ends once every sender is gone and the queue is drained.
                for link in rx.iter() {
                    clean(&link);
                    thread_cleaned.fetch_add(1, Ordering::Relaxed);
                }
                log::debug!("[LinkCleanupTask] worker exiting");
            })?;

        Ok(Self {
            worker: Mutex::new(Some(Worker {
                queue: Some(tx),
                thread: Some(thread),
            })),
            cleaned,
        })
    }

    /// Queue `link` for cleanup without blocking.
    ///
    /// A full or stopped queue falls back to cleaning on the caller's thread.
    pub fn add(&self, link: Arc<Link>) {
        let rejected = {
            let worker = self.worker.lock();
            match worker.as_ref().and_then(|w| w.queue.as_ref()) {
                Some(queue) => match queue.try_send(link) {
                    Ok(()) => None,
                    Err(TrySendError::Full(link)) => {
                        log::warn!(
                            "[LinkCleanupTask::add] queue full, cleaning link {} inline",
                            link.id()
                        );
                        Some(link)
                    }
                    Err(TrySendError::Disconnected(link)) => {
                        log::warn!(
                            "[LinkCleanupTask::add] worker gone, cleaning link {} inline",
                            link.id()
                        );
                        Some(link)
                    }
                },
                None => {
                    log::warn!(
                        "[LinkCleanupTask::add] task stopped, cleaning link {} inline",
                        link.id()
                    );
                    Some(link)
                }
            }
        };

        if let Some(link) = rejected {
            clean(&link);
            self.cleaned.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Links cleaned so far, by the worker or inline.
    pub fn cleaned_count(&self) -> usize {
        self.cleaned.load(Ordering::Relaxed)
    }

    /// Drain the queue and join the worker. Idempotent.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }
    }
}

impl Drop for LinkCleanupTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn clean(link: &Link) {
    let detached = link.clear_associations();
    log::trace!(
        "[LinkCleanupTask] link {} cleaned, {} endpoint(s) detached",
        link.id(),
        detached
    );
}
