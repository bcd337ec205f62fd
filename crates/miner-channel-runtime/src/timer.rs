//! Repeating timer
//!
//! Runs an async tick after a wait, repeatedly, until the tick asks to stop,
//! a fixed number of ticks has run, or the timer is stopped from outside.
//! The wait before each tick comes from a [`WaitSchedule`]: a fixed interval,
//! a random interval within bounds, or an exponential backoff.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use miner_channel_core::RetryPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Wait applied before each tick
#[derive(Debug, Clone)]
pub enum WaitSchedule {
    Fixed(Duration),
    /// Uniformly random in `[min, max]` (bounds are swapped if reversed)
    Jittered { min: Duration, max: Duration },
    Backoff(RetryPolicy),
}

impl WaitSchedule {
    /// Wait before tick number `tick` (0-based)
    pub fn wait_for(&self, tick: u32) -> Duration {
        match self {
            WaitSchedule::Fixed(wait) => *wait,
            WaitSchedule::Jittered { min, max } => {
                let (low, high) = if min <= max { (*min, *max) } else { (*max, *min) };
                let low_ms = low.as_millis() as u64;
                let high_ms = high.as_millis() as u64;
                Duration::from_millis(fastrand::u64(low_ms..=high_ms))
            }
            WaitSchedule::Backoff(policy) => policy.delay_for(tick),
        }
    }
}

/// How a timer finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// A tick returned `ControlFlow::Break`
    Completed,
    /// The tick limit was reached
    Exhausted,
    /// Stopped from outside, or the timer task was cancelled
    Stopped,
}

/// Cloneable handle that stops a running timer before its next tick
#[derive(Debug, Clone)]
pub struct TimerStopHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl TimerStopHandle {
    pub fn stop(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.borrow()
    }
}

/// A running repeating timer
#[derive(Debug)]
pub struct RepeatingTimer {
    stop: TimerStopHandle,
    handle: JoinHandle<TimerOutcome>,
}

impl RepeatingTimer {
    /// Start ticking. `times` bounds the number of ticks (`None` runs until
    /// the tick breaks or the timer is stopped). A tick already in progress
    /// is never interrupted by `stop`.
    pub fn start<F, Fut>(schedule: WaitSchedule, times: Option<u32>, mut tick: F) -> Self
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (signal, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut count = 0u32;
            loop {
                if times.map_or(false, |limit| count >= limit) {
                    return TimerOutcome::Exhausted;
                }

                tokio::select! {
                    _ = tokio::time::sleep(schedule.wait_for(count)) => {}
                    _ = wait_for_stop(&mut stopped) => return TimerOutcome::Stopped,
                }
                if *stopped.borrow() {
                    return TimerOutcome::Stopped;
                }

                let flow = tick(count).await;
                count = count.saturating_add(1);
                if flow.is_break() {
                    return TimerOutcome::Completed;
                }
            }
        });

        Self {
            stop: TimerStopHandle {
                signal: Arc::new(signal),
            },
            handle,
        }
    }

    pub fn stop_handle(&self) -> TimerStopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the timer to finish
    pub async fn join(self) -> TimerOutcome {
        self.handle.await.unwrap_or(TimerOutcome::Stopped)
    }
}

async fn wait_for_stop(stopped: &mut watch::Receiver<bool>) {
    let signalled = stopped.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        // Every handle is gone, so nobody can stop us any more
        std::future::pending::<()>().await;
    }
}
