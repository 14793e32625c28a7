use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// A running interval timer; aborted when dropped.
#[derive(Debug)]
pub struct PollTask {
    generation: u64,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// Send `tick(generation)` to `tx` immediately and then every `period`.
    ///
    /// Stops by itself once the receiver is gone.
    pub fn spawn<T, F>(generation: u64, period: Duration, tx: mpsc::Sender<T>, tick: F) -> Self
    where
        T: Send + 'static,
        F: Fn(u64) -> T + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(tick(generation)).await.is_err() {
                    break;
                }
            }
        });
        Self { generation, handle }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Holds at most one [`PollTask`] for a polling role.
///
/// Starting a new task aborts the previous one first. Ticks carry the
/// generation they were produced under so the receiver can discard ticks
/// that were already queued when their task was replaced.
#[derive(Debug)]
pub struct PollSlot {
    role: &'static str,
    next_generation: u64,
    current: Option<PollTask>,
}

impl PollSlot {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            next_generation: 1,
            current: None,
        }
    }

    pub fn start<T, F>(&mut self, period: Duration, tx: mpsc::Sender<T>, tick: F) -> u64
    where
        T: Send + 'static,
        F: Fn(u64) -> T + Send + 'static,
    {
        self.cancel();
        let generation = self.next_generation;
        self.next_generation += 1;
        log::debug!("{} poller started (generation {generation}, every {period:?})", self.role);
        self.current = Some(PollTask::spawn(generation, period, tx, tick));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.current.take() {
            log::debug!("{} poller stopped (generation {})", self.role, task.generation());
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|task| task.generation() == generation)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}
