//! Named timer registry
//!
//! Every background task of the engine (drain interval, auto sync, cleanup,
//! per-operation retries, the push bridge) is spawned through one registry.
//! [`TimerRegistry::stop_all`] is the only way they are cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

struct Timer {
    handle: JoinHandle<()>,
    /// Set once a one-shot timer's delay elapsed and its callback runs
    fired: Arc<AtomicBool>,
}

impl Timer {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !self.fired.load(Ordering::SeqCst)
    }
}

/// Owner of all outstanding timers
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, Timer>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` once after `delay`
    ///
    /// Returns `false` without scheduling if a timer with this name is still
    /// waiting. A timer whose callback is already running may schedule its
    /// own successor under the same name.
    pub fn schedule<F, Fut>(&self, name: &str, delay: Duration, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.lock_pruned();
        if timers.get(name).is_some_and(Timer::is_live) {
            debug!("Timer {} already scheduled", name);
            return false;
        }

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            f().await;
        });

        timers.insert(name.to_string(), Timer { handle, fired });
        true
    }

    /// Run `f` every `period`, starting one period from now, until it
    /// returns `ControlFlow::Break`
    ///
    /// A tick that overruns delays the next one instead of bursting.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, mut f: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut timers = self.lock_pruned();
        if timers.get(name).is_some_and(Timer::is_live) {
            debug!("Timer {} already scheduled", name);
            return false;
        }

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if f().await.is_break() {
                    break;
                }
            }
        });

        timers.insert(
            name.to_string(),
            Timer {
                handle,
                fired: Arc::new(AtomicBool::new(false)),
            },
        );
        true
    }

    /// Track an already spawned long-running task under `name`
    pub fn track(&self, name: &str, handle: JoinHandle<()>) -> bool {
        let mut timers = self.lock_pruned();
        if timers.get(name).is_some_and(Timer::is_live) {
            handle.abort();
            return false;
        }
        timers.insert(
            name.to_string(),
            Timer {
                handle,
                fired: Arc::new(AtomicBool::new(false)),
            },
        );
        true
    }

    /// Cancel every timer; returns how many were still running
    pub fn stop_all(&self) -> usize {
        let timers: Vec<(String, Timer)> = self.lock().drain().collect();
        let mut stopped = 0;
        for (name, timer) in timers {
            if !timer.handle.is_finished() {
                timer.handle.abort();
                debug!("Stopped timer {}", name);
                stopped += 1;
            }
        }
        stopped
    }

    /// Whether a timer with this name is waiting to fire
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(Timer::is_live)
    }

    /// Number of timers still waiting or repeating
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|t| t.is_live()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Timer>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the map, dropping timers whose task has ended
    fn lock_pruned(&self) -> std::sync::MutexGuard<'_, HashMap<String, Timer>> {
        let mut timers = self.lock();
        timers.retain(|_, timer| !timer.handle.is_finished());
        timers
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
