//! Cancel-before-arm timers that post events back onto the engine loop.
//!
//! A [`Timer`] owns at most one spawned task. Arming always aborts the
//! previous task first, and every arm gets a new generation number that is
//! embedded in the posted event. An event that was already queued when the
//! timer was re-armed or cancelled carries an old generation and must be
//! ignored by the receiver (see [`Timer::is_current`]).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct Timer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once after `delay`. Returns the generation of this arm.
    pub fn arm_once<T, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        let generation = self.rearm();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(generation));
        }));
        generation
    }

    /// Fire every `period` until cancelled or the receiver goes away.
    pub fn arm_periodic<T, F>(
        &mut self,
        period: Duration,
        tx: mpsc::UnboundedSender<T>,
        make: F,
    ) -> u64
    where
        T: Send + 'static,
        F: Fn(u64) -> T + Send + 'static,
    {
        let generation = self.rearm();
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Whether an event stamped with `generation` still belongs to the live arm.
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }

    fn rearm(&mut self) -> u64 {
        self.cancel();
        self.generation
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_arm_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let generation = timer.arm_once(Duration::from_millis(200), tx, |g| g);

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(rx.recv().await, Some(generation));
        assert!(timer.is_current(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let first = timer.arm_once(Duration::from_millis(200), tx.clone(), |g| g);
        tokio::time::advance(Duration::from_millis(100)).await;
        let second = timer.arm_once(Duration::from_millis(200), tx, |g| g);
        assert_ne!(first, second);
        assert!(!timer.is_current(first));

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(rx.recv().await, Some(second));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        let generation = timer.arm_periodic(Duration::from_secs(1), tx, |g| g);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert_eq!(rx.recv().await, Some(generation));
        }

        timer.cancel();
        assert!(!timer.is_current(generation));
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_without_arm_is_harmless() {
        let mut timer = Timer::new();
        timer.cancel();
        assert!(!timer.is_armed());
        assert!(!timer.is_current(0));
    }
}
