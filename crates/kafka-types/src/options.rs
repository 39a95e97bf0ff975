//! Client options that are not part of the native configuration.

use std::time::Duration;

use crate::bridge::ChannelBound;
use crate::error::{Error, Result};

/// Poll cadence, channel bound and timeouts for a producer or consumer client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Sleep between polls that returned nothing. Also the upper bound on how
    /// long a poll loop takes to notice cancellation.
    pub poll_interval: Duration,
    /// Bound of the event (producer) or message (consumer) channel.
    pub channel_bound: ChannelBound,
    /// Timeout for broker round trips: commits and transaction control.
    pub operation_timeout: Duration,
    /// How long shutdown waits for in-flight sends before failing them.
    pub shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            channel_bound: ChannelBound::Unbounded,
            operation_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientOptions {
    /// Defaults for a consumer: a blocking bound so a slow reader pauses the
    /// poll loop instead of growing memory.
    pub fn consumer() -> Self {
        Self {
            channel_bound: ChannelBound::blocking(1024),
            ..Self::default()
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn channel_bound(mut self, bound: ChannelBound) -> Self {
        self.channel_bound = bound;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if let ChannelBound::Bounded { capacity: 0, .. } = self.channel_bound {
            return Err(Error::Configuration(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
