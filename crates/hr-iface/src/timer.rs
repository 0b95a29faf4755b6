//! The single timer facility shared by all interfaces.
//!
//! The registry arms it for the earliest pending border discovery. Whoever
//! drives the timer calls [`InterfaceRegistry::run_timeout`] once it expires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::platform::Platform;
use crate::registry::InterfaceRegistry;
use crate::types::Millis;

pub trait Timer: Send {
    /// Arm the timer, replacing any earlier schedule.
    fn schedule(&mut self, delay: Duration);

    fn cancel(&mut self);

    fn now(&self) -> Millis;
}

pub type TimerWatch = watch::Receiver<Option<Instant>>;

/// Timer backed by the tokio clock. The deadline is published on a watch
/// channel consumed by [`run_timer_loop`].
pub struct TokioTimer {
    epoch: Instant,
    deadline: watch::Sender<Option<Instant>>,
}

impl TokioTimer {
    pub fn new() -> (Self, TimerWatch) {
        let (deadline, rx) = watch::channel(None);
        let timer = Self {
            epoch: Instant::now(),
            deadline,
        };
        (timer, rx)
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration) {
        self.deadline.send_replace(Some(Instant::now() + delay));
    }

    fn cancel(&mut self) {
        self.deadline.send_replace(None);
    }

    fn now(&self) -> Millis {
        Millis::try_from(self.epoch.elapsed().as_millis()).unwrap_or(Millis::MAX)
    }
}

/// Fire the registry's timeout whenever the published deadline passes.
///
/// Runs until the task is aborted or the timer is dropped. Holding the
/// registry lock for the whole callback keeps every callback run-to-completion.
pub async fn run_timer_loop<P, T>(registry: Arc<Mutex<InterfaceRegistry<P, T>>>, mut deadline: TimerWatch)
where
    P: Platform,
    T: Timer,
{
    info!("Interface timer loop started");
    loop {
        let next = *deadline.borrow_and_update();
        match next {
            None => {
                if deadline.changed().await.is_err() {
                    break;
                }
            }
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let resolved = registry.lock().await.run_timeout();
                        debug!(resolved, "Interface timer fired");
                    }
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    info!("Interface timer loop stopped");
}
