//! Debouncer for the auto-flush loop.
//!
//! A single-shot timer: `trigger` schedules the action after the quiet
//! period and resets the deadline on every further trigger, so a burst
//! of mutations produces one flush. `cancel` stops a pending action
//! without firing. Thread-safe; the action runs on a dedicated worker
//! thread.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Msg {
    Trigger,
    Cancel,
    Shutdown,
}

pub struct Debouncer {
    tx: Sender<Msg>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    /// Create a debouncer firing `action` once per quiet period of
    /// `delay` after the last trigger.
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = unbounded::<Msg>();

        let worker = std::thread::spawn(move || {
            let mut deadline: Option<Instant> = None;
            loop {
                let msg = match deadline {
                    Some(d) => {
                        let wait = d.saturating_duration_since(Instant::now());
                        match rx.recv_timeout(wait) {
                            Ok(msg) => msg,
                            Err(RecvTimeoutError::Timeout) => {
                                deadline = None;
                                action();
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    None => match rx.recv() {
                        Ok(msg) => msg,
                        Err(_) => break,
                    },
                };

                match msg {
                    Msg::Trigger => deadline = Some(Instant::now() + delay),
                    Msg::Cancel => deadline = None,
                    Msg::Shutdown => break,
                }
            }
        });

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Schedule (or reschedule) the action after the quiet period.
    pub fn trigger(&self) {
        let _ = self.tx.send(Msg::Trigger);
    }

    /// Drop any pending action without firing it.
    pub fn cancel(&self) {
        let _ = self.tx.send(Msg::Cancel);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
