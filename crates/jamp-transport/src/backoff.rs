//! Exponential backoff for the duplex transport's reconnect timer.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reconnect timing for the duplex transport.
///
/// After each unexpected close the controller waits the current interval,
/// then multiplies it by `decay`, never exceeding `max_interval`. A
/// successful open resets it to `initial_interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt. Default: 1 s.
    pub initial_interval: Duration,
    /// Growth factor applied after every unexpected close. Must be > 1.
    /// Default: 1.5.
    pub decay: f64,
    /// Ceiling for the interval. Default: 30 s.
    pub max_interval: Duration,
    /// Randomize each delay within `[delay / 2, delay]` so many clients
    /// dropped by the same server restart do not reconnect in lockstep.
    /// Default: off.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            decay: Self::DEFAULT_DECAY,
            max_interval: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    const DEFAULT_DECAY: f64 = 1.5;

    /// Fix out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Backoff::new`]. Rules:
    /// - a zero `initial_interval` becomes 1 s; anything else below 1 ms
    ///   becomes 1 ms.
    /// - `decay` must be finite and > 1, otherwise it becomes 1.5.
    /// - `max_interval` is raised to `initial_interval` if below it.
    pub fn validated(mut self) -> Self {
        if self.initial_interval.is_zero() {
            warn!("initial reconnect interval is zero, using default");
            self.initial_interval = Self::default().initial_interval;
        } else if self.initial_interval < Duration::from_millis(1) {
            warn!(
                initial_us = self.initial_interval.as_micros() as u64,
                "initial reconnect interval below 1 ms, clamping"
            );
            self.initial_interval = Duration::from_millis(1);
        }
        if !(self.decay.is_finite() && self.decay > 1.0) {
            warn!(decay = self.decay, "reconnect decay must be > 1, using default");
            self.decay = Self::DEFAULT_DECAY;
        }
        if self.max_interval < self.initial_interval {
            warn!(
                initial_ms = self.initial_interval.as_millis() as u64,
                max_ms = self.max_interval.as_millis() as u64,
                "max reconnect interval below initial, raising it"
            );
            self.max_interval = self.initial_interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// The reconnect interval state machine.
///
/// After `k` consecutive calls to [`next_delay`](Self::next_delay),
/// [`current`](Self::current) is `min(initial * decay^k, max)` rounded to
/// the nearest millisecond. Each value is computed from `k` directly, so
/// rounding never accumulates.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempts: i32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config: config.validated(),
            attempts: 0,
        }
    }

    /// The interval the next unexpected close will wait.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.interval_ms(self.attempts))
    }

    /// Returns the delay to wait before the next open attempt and grows
    /// the interval for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay_ms = self.interval_ms(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        let delay_ms = if self.config.jitter && delay_ms > 1 {
            rand::rng().random_range(delay_ms / 2..=delay_ms)
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms)
    }

    /// Back to the initial interval. Called when the channel opens.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn interval_ms(&self, attempts: i32) -> u64 {
        let initial = millis(self.config.initial_interval) as f64;
        let max = millis(self.config.max_interval) as f64;
        (initial * self.config.decay.powi(attempts)).min(max).round() as u64
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, decay: f64, max_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_interval: Duration::from_millis(initial_ms),
            decay,
            max_interval: Duration::from_millis(max_ms),
            jitter: false,
        }
    }

    #[test]
    fn test_next_delay_returns_current_then_grows() {
        let mut b = Backoff::new(config(100, 2.0, 10_000));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.current(), Duration::from_millis(800));
    }

    #[test]
    fn test_current_after_k_closes_is_capped_power() {
        let (initial, decay, ceiling) = (100u64, 2.0f64, 5_000u64);
        let mut b = Backoff::new(config(initial, decay, ceiling));

        for k in 1..=20u32 {
            b.next_delay();
            let expected = ((initial as f64) * decay.powi(k as i32)).min(ceiling as f64);
            assert_eq!(b.current(), Duration::from_millis(expected as u64), "k = {k}");
        }
        assert_eq!(b.current(), Duration::from_millis(ceiling));
    }

    #[test]
    fn test_current_at_default_decay_matches_closed_form() {
        let mut b = Backoff::new(ReconnectConfig::default());
        let expected = [
            1_000u64, 1_500, 2_250, 3_375, 5_063, 7_594, 11_391, 17_086, 25_629, 30_000,
            30_000,
        ];

        for (k, want) in expected.iter().enumerate() {
            assert_eq!(b.current(), Duration::from_millis(*want), "k = {k}");
            assert_eq!(b.next_delay(), Duration::from_millis(*want), "k = {k}");
        }
    }

    #[test]
    fn test_current_stays_capped_after_many_attempts() {
        let mut b = Backoff::new(config(1_000, 1.5, 30_000));
        for _ in 0..5_000 {
            b.next_delay();
        }
        assert_eq!(b.current(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset_restores_initial_interval() {
        let mut b = Backoff::new(config(250, 1.5, 30_000));
        for _ in 0..5 {
            b.next_delay();
        }
        assert!(b.current() > Duration::from_millis(250));

        b.reset();

        assert_eq!(b.current(), Duration::from_millis(250));
        assert_eq!(b.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_validated_replaces_non_growing_decay() {
        let cfg = config(100, 1.0, 1_000).validated();
        assert_eq!(cfg.decay, ReconnectConfig::DEFAULT_DECAY);

        let cfg = config(100, f64::NAN, 1_000).validated();
        assert_eq!(cfg.decay, ReconnectConfig::DEFAULT_DECAY);
    }

    #[test]
    fn test_validated_replaces_zero_initial_interval() {
        let cfg = config(0, 2.0, 10_000).validated();
        assert_eq!(cfg.initial_interval, Duration::from_secs(1));

        let mut b = Backoff::new(config(0, 2.0, 10_000));
        let delays: Vec<u64> = (0..4).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000]);
    }

    #[test]
    fn test_validated_clamps_sub_millisecond_initial_interval() {
        let cfg = ReconnectConfig {
            initial_interval: Duration::from_micros(300),
            ..config(1, 2.0, 10_000)
        }
        .validated();
        assert_eq!(cfg.initial_interval, Duration::from_millis(1));

        let mut b = Backoff::new(cfg);
        let delays: Vec<u64> = (0..4).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_validated_raises_ceiling_below_initial() {
        let cfg = config(2_000, 2.0, 500).validated();
        assert_eq!(cfg.max_interval, Duration::from_millis(2_000));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full_delay() {
        let mut b = Backoff::new(ReconnectConfig {
            jitter: true,
            ..config(1_000, 2.0, 60_000)
        });
        for expected in [1_000u64, 2_000, 4_000, 8_000] {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(expected / 2), "{d:?}");
            assert!(d <= Duration::from_millis(expected), "{d:?}");
        }
    }

    #[test]
    fn test_default_config() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.initial_interval, Duration::from_secs(1));
        assert_eq!(cfg.decay, 1.5);
        assert_eq!(cfg.max_interval, Duration::from_secs(30));
        assert!(!cfg.jitter);
    }
}
