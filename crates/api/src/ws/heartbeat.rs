use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::ServerConfig;

/// How often a subscriber loop re-reads its task from the store.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between Ping frames.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no Pong for this long is considered dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection timers for one subscriber loop.
///
/// None of the tickers fire immediately; the first tick of each is one
/// full period after construction.
pub(crate) struct Heartbeat {
    pub(crate) poll: Interval,
    pub(crate) ping: Interval,
    pub(crate) deadline: Pin<Box<Sleep>>,
    pong_timeout: Duration,
}

impl Heartbeat {
    pub(crate) fn from_config(config: &ServerConfig) -> Self {
        Self::with_periods(
            config.ws_poll_interval,
            config.ws_ping_interval,
            config.ws_pong_timeout,
        )
    }

    pub(crate) fn with_periods(poll: Duration, ping: Duration, pong_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            poll: ticker(now, poll),
            ping: ticker(now, ping),
            deadline: Box::pin(tokio::time::sleep_until(now + pong_timeout)),
            pong_timeout,
        }
    }

    /// Push the read deadline out by a full timeout.
    pub(crate) fn pong(&mut self) {
        self.deadline
            .as_mut()
            .reset(Instant::now() + self.pong_timeout);
    }
}

fn ticker(now: Instant, period: Duration) -> Interval {
    let mut interval = interval_at(now + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
