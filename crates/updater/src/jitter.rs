use rand::Rng;
use std::time::Duration;

/// Default exclusive upper bound of the startup delay, in seconds.
pub const DEFAULT_MAX_JITTER_SECS: u64 = 60;

/// Spreads update checks of a fleet started at the same moment.
#[derive(Debug, Clone, Copy)]
pub struct JitterScheduler {
    max_secs: u64,
}

impl Default for JitterScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JITTER_SECS)
    }
}

impl JitterScheduler {
    /// Delays are drawn from `0..max_secs` whole seconds. A zero bound
    /// disables the delay.
    pub fn new(max_secs: u64) -> Self {
        Self { max_secs }
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    pub fn delay(&self) -> Duration {
        if self.max_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::thread_rng().gen_range(0..self.max_secs))
    }

    /// Sleep for a freshly drawn delay and return it.
    pub async fn wait(&self) -> Duration {
        let delay = self.delay();
        tracing::info!(seconds = delay.as_secs(), "delaying update check");
        tokio::time::sleep(delay).await;
        delay
    }
}
