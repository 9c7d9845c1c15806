//! Periodic tick sources for outgoing heart-beats.
//!
//! Both strategies invoke the tick callback with the milliseconds elapsed
//! since `start`. The callback should only post a message; it runs on the
//! ticker's own task or thread.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::TickerStrategy;

/// Tick callback; receives elapsed milliseconds.
pub type TickFn = Box<dyn FnMut(u64) + Send + 'static>;

/// A restartable periodic timer.
pub trait Ticker: Send {
    /// Start ticking, stopping any previous run first.
    fn start(&mut self, tick: TickFn);

    /// Stop ticking. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn period(&self) -> Duration;
}

/// Build the ticker selected by `strategy`.
pub fn new_ticker(strategy: TickerStrategy, period: Duration) -> Box<dyn Ticker> {
    match strategy {
        TickerStrategy::Interval => Box::new(IntervalTicker::new(period)),
        TickerStrategy::Thread => Box::new(ThreadTicker::new(period)),
    }
}

/// Ticks from a tokio interval task. Must be started inside a runtime.
#[derive(Debug)]
pub struct IntervalTicker {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }
}

impl Ticker for IntervalTicker {
    fn start(&mut self, mut tick: TickFn) {
        self.stop();
        let period = self.period;
        debug!(period_ms = period.as_millis() as u64, "starting interval ticker");

        self.task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = tokio::time::interval_at(started + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick(started.elapsed().as_millis() as u64);
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            trace!("interval ticker stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ticks from a dedicated OS thread.
///
/// The thread shares nothing with its owner but two channels: a stop signal
/// in, elapsed milliseconds out through the tick callback.
#[derive(Debug)]
pub struct ThreadTicker {
    period: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl ThreadTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            stop_tx: None,
        }
    }
}

impl Ticker for ThreadTicker {
    fn start(&mut self, mut tick: TickFn) {
        self.stop();
        let period = self.period;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("stompwire-ticker".to_string())
            .spawn(move || {
                let started = std::time::Instant::now();
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => tick(started.elapsed().as_millis() as u64),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(_) => {
                debug!(period_ms = period.as_millis() as u64, "starting thread ticker");
                self.stop_tx = Some(stop_tx);
            }
            Err(err) => warn!(error = %err, "failed to spawn ticker thread"),
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            trace!("thread ticker stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (TickFn, Arc<Mutex<Vec<u64>>>) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        (Box::new(move |elapsed| sink.lock().unwrap().push(elapsed)), ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_reports_elapsed_time() {
        let mut ticker = IntervalTicker::new(Duration::from_millis(100));
        let (tick, ticks) = recorder();
        ticker.start(tick);
        assert!(ticker.is_running());

        tokio::time::sleep(Duration::from_millis(350)).await;
        ticker.stop();
        ticker.stop();
        assert!(!ticker.is_running());

        assert_eq!(*ticks.lock().unwrap(), vec![100, 200, 300]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_run() {
        let mut ticker = IntervalTicker::new(Duration::from_millis(100));
        let (first, first_ticks) = recorder();
        let (second, second_ticks) = recorder();

        ticker.start(first);
        tokio::time::sleep(Duration::from_millis(150)).await;
        ticker.start(second);
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(ticker);

        assert_eq!(first_ticks.lock().unwrap().len(), 1);
        assert_eq!(*second_ticks.lock().unwrap(), vec![100, 200]);
    }

    #[test]
    fn thread_ticker_ticks_until_stopped() {
        let mut ticker = new_ticker(TickerStrategy::Thread, Duration::from_millis(10));
        let (tick, ticks) = recorder();
        ticker.start(tick);
        assert!(ticker.is_running());

        thread::sleep(Duration::from_millis(80));
        ticker.stop();
        assert!(!ticker.is_running());
        thread::sleep(Duration::from_millis(20));
        let count = ticks.lock().unwrap().len();
        assert!(count >= 2, "expected several ticks, got {count}");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.lock().unwrap().len(), count);
        assert!(ticks.lock().unwrap().windows(2).all(|w| w[0] < w[1]));
    }
}
