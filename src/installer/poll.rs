//! Fixed-interval polling with a deadline and a shutdown signal

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("Timed out after {waited:?} waiting for {what}")]
    TimedOut { what: String, waited: Duration },

    #[error("Interrupted while waiting for {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    /// No deadline when `None`
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Clone)]
pub struct Poller {
    settings: PollSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Poller {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            shutdown: None,
        }
    }

    /// Stop waiting as soon as `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Run `check` until it yields a value, sleeping `interval` between
    /// attempts. Errors from `check` end the loop immediately.
    pub async fn until<T, E, F, Fut>(&self, what: &str, mut check: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<PollError>,
    {
        let started = Instant::now();
        let deadline = self.settings.timeout.map(|t| started + t);
        let mut shutdown = self.shutdown.clone();

        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(PollError::Cancelled(what.to_string()).into());
            }
            if let Some(value) = check().await? {
                return Ok(value);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(PollError::TimedOut {
                    what: what.to_string(),
                    waited: started.elapsed(),
                }
                .into());
            }

            debug!("Still waiting for {}", what);
            let sleep = tokio::time::sleep(self.settings.interval);
            match shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = sleep => {}
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // sender gone, nobody can cancel any more
                                shutdown = None;
                            }
                        }
                    }
                }
                None => sleep.await,
            }
        }
    }
}
