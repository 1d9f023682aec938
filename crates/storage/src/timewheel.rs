//! Keyed one-shot timer wheel.
//!
//! A fixed ring of slots advanced by a ticker. Tasks are addressed by a
//! string key: adding a task under an existing key replaces the old one, and
//! a cancelled task never fires. All mutations go through a channel drained
//! by a single worker task, so the wheel itself is serialized; due jobs are
//! spawned onto fresh tasks so a slow job cannot delay the tick.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Command {
    Add { key: String, delay: Duration, job: Job },
    Cancel { key: String },
    Stop,
}

struct Task {
    rotations: usize,
    job: Job,
}

/// Cloneable handle to a running wheel.
#[derive(Clone)]
pub struct TimeWheel {
    tx: mpsc::UnboundedSender<Command>,
    interval: Duration,
}

impl TimeWheel {
    /// Spawn the worker and return a handle. Must be called inside a tokio
    /// runtime.
    pub fn start(interval: Duration, slots: usize) -> TimeWheel {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            rx,
            slots: (0..slots.max(1)).map(|_| HashMap::new()).collect(),
            locations: HashMap::new(),
            current: 0,
            interval,
        };
        tokio::spawn(worker.run());
        TimeWheel { tx, interval }
    }

    /// Schedule `job` to run after `delay`, replacing any task under `key`.
    pub fn delay(&self, delay: Duration, key: impl Into<String>, job: impl Future<Output = ()> + Send + 'static) {
        let _ = self.tx.send(Command::Add {
            key: key.into(),
            delay,
            job: Box::pin(job),
        });
    }

    /// Schedule `job` at an absolute instant. Instants in the past fire on
    /// the next tick.
    pub fn at(&self, when: SystemTime, key: impl Into<String>, job: impl Future<Output = ()> + Send + 'static) {
        let delay = when
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .max(self.interval);
        self.delay(delay, key, job);
    }

    /// Drop the task under `key`, if any. A cancelled task never fires.
    pub fn cancel(&self, key: &str) {
        let _ = self.tx.send(Command::Cancel { key: key.to_string() });
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Command>,
    slots: Vec<HashMap<String, Task>>,
    locations: HashMap<String, usize>,
    current: usize,
    interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Add { key, delay, job }) => self.add(key, delay, job),
                    Some(Command::Cancel { key }) => self.remove(&key),
                    Some(Command::Stop) | None => return,
                },
            }
        }
    }

    fn tick(&mut self) {
        let slot_count = self.slots.len();
        let slot = &mut self.slots[self.current];
        self.current = (self.current + 1) % slot_count;

        let entries: Vec<(String, Task)> = slot.drain().collect();
        for (key, mut task) in entries {
            if task.rotations > 0 {
                task.rotations -= 1;
                self.slots[(self.current + slot_count - 1) % slot_count].insert(key, task);
            } else {
                debug!(key = %key, "timer fired");
                self.locations.remove(&key);
                tokio::spawn(task.job);
            }
        }
    }

    fn add(&mut self, key: String, delay: Duration, job: Job) {
        let ticks = (delay.as_secs() / self.interval.as_secs().max(1)) as usize;
        let rotations = ticks / self.slots.len();
        let slot_index = (self.current + ticks) % self.slots.len();

        if self.locations.contains_key(&key) {
            self.remove(&key);
        }
        self.slots[slot_index].insert(key.clone(), Task { rotations, job });
        self.locations.insert(key, slot_index);
    }

    fn remove(&mut self, key: &str) {
        if let Some(slot_index) = self.locations.remove(key) {
            self.slots[slot_index].remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let wheel = TimeWheel::start(Duration::from_secs(1), 60);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        wheel.delay(Duration::from_secs(2), "t", async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_fires() {
        let wheel = TimeWheel::start(Duration::from_secs(1), 60);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        wheel.delay(Duration::from_secs(2), "t", async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        wheel.cancel("t");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_task_fires_once() {
        let wheel = TimeWheel::start(Duration::from_secs(1), 60);
        let fired = Arc::new(AtomicUsize::new(0));
        let f1 = fired.clone();
        wheel.delay(Duration::from_secs(1), "t", async move {
            f1.fetch_add(100, Ordering::SeqCst);
        });
        let f2 = fired.clone();
        wheel.delay(Duration::from_secs(2), "t", async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_delay_rotates() {
        // 4-slot wheel, 6s delay: one full rotation plus two slots.
        let wheel = TimeWheel::start(Duration::from_secs(1), 4);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        wheel.delay(Duration::from_secs(6), "t", async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
