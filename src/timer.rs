//! Timer capability for the orchestrator.
//!
//! The orchestrator never touches `tokio::time` directly. It asks a
//! [`Scheduler`] for a [`Ticker`] when polling starts and drops it when
//! polling stops, so the ticker's owner is the only thing that can keep a
//! polling loop alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

/// A repeating timer. The first tick completes immediately.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start a repeating timer with the given period.
    fn interval(&self, period: Duration) -> Box<dyn Ticker>;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock scheduler backed by tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

struct TokioTicker(Interval);

#[async_trait]
impl Ticker for TokioTicker {
    async fn tick(&mut self) {
        self.0.tick().await;
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    fn interval(&self, period: Duration) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(TokioTicker(interval))
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Scheduler whose timers fire without waiting. Records what was asked of
/// it, for tests and dry runs.
#[derive(Clone, Default)]
pub struct ImmediateScheduler {
    inner: Arc<ImmediateInner>,
}

#[derive(Default)]
struct ImmediateInner {
    ticks: AtomicU64,
    live_tickers: AtomicU64,
    intervals: Mutex<Vec<Duration>>,
    sleeps: Mutex<Vec<Duration>>,
}

struct ImmediateTicker {
    inner: Arc<ImmediateInner>,
}

impl Drop for ImmediateTicker {
    fn drop(&mut self) {
        self.inner.live_tickers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ticker for ImmediateTicker {
    async fn tick(&mut self) {
        self.inner.ticks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl Scheduler for ImmediateScheduler {
    fn interval(&self, period: Duration) -> Box<dyn Ticker> {
        self.inner
            .intervals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(period);
        self.inner.live_tickers.fetch_add(1, Ordering::SeqCst);
        Box::new(ImmediateTicker {
            inner: Arc::clone(&self.inner),
        })
    }

    async fn sleep(&self, duration: Duration) {
        self.inner
            .sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks delivered across all tickers.
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::SeqCst)
    }

    /// Tickers created and not yet dropped.
    pub fn live_tickers(&self) -> u64 {
        self.inner.live_tickers.load(Ordering::SeqCst)
    }

    /// Periods of every ticker requested so far.
    pub fn intervals(&self) -> Vec<Duration> {
        self.inner
            .intervals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
