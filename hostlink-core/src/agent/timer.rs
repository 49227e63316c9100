//! Fire-once timer owned by the agent loop.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// Timer that fires at most once per [`start`](OneShotTimer::start).
///
/// [`fired`](OneShotTimer::fired) is cancel-safe and pends forever while
/// the timer is not armed, so it can sit in a `select!` unconditionally.
#[derive(Debug, Default)]
pub struct OneShotTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.sleep.is_some()
    }

    /// Arm the timer. Ignored while already armed.
    pub fn start(&mut self, delay: Duration) {
        if self.sleep.is_none() {
            self.sleep = Some(Box::pin(sleep(delay)));
        }
    }

    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}
