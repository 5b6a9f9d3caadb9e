//! Human-like pacing between network actions.
//!
//! [`PacingPolicy`] turns a counter of successfully processed items into a
//! delay. Most actions get a short randomized delay; every Nth completed item
//! gets a long cooldown instead. Delays are drawn uniformly from a range so
//! the request cadence has no fixed period.
//!
//! # Example
//!
//! ```
//! use harvester_core::pacing::{DelayKind, PacingPolicy};
//!
//! let policy = PacingPolicy::default();
//! let (kind, _delay) = policy.next_delay(20);
//! assert_eq!(kind, DelayKind::Cooldown);
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

/// Default short delay range (2 to 6 seconds).
const DEFAULT_SHORT_MIN: Duration = Duration::from_secs(2);
const DEFAULT_SHORT_MAX: Duration = Duration::from_secs(6);

/// Default cooldown range (20 to 40 seconds).
const DEFAULT_COOLDOWN_MIN: Duration = Duration::from_secs(20);
const DEFAULT_COOLDOWN_MAX: Duration = Duration::from_secs(40);

/// Default number of completed items between cooldowns.
pub const DEFAULT_COOLDOWN_EVERY: u32 = 20;

/// Default settle range after a navigation (1 to 2 seconds).
const DEFAULT_SETTLE_MIN: Duration = Duration::from_secs(1);
const DEFAULT_SETTLE_MAX: Duration = Duration::from_secs(2);

/// Inclusive range a delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    /// Creates a range, swapping the bounds if they are reversed.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// A range that always yields zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Returns true if `delay` lies within the range.
    #[must_use]
    pub fn contains(&self, delay: Duration) -> bool {
        delay >= self.min && delay <= self.max
    }

    fn sample(&self, rng: &mut impl Rng) -> Duration {
        let min_ms = duration_millis(self.min);
        let max_ms = duration_millis(self.max);
        if min_ms >= max_ms {
            return Duration::from_millis(min_ms);
        }
        Duration::from_millis(rng.gen_range(min_ms..=max_ms))
    }
}

/// Which delay class a drawn delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    Short,
    Cooldown,
}

/// Delay policy for page navigations and item processing.
///
/// Stateless apart from its configuration: the caller owns the counter of
/// completed items and passes it in.
///
/// # Default Values
///
/// - `short`: 2 to 6 seconds
/// - `cooldown`: 20 to 40 seconds
/// - `cooldown_every`: 20 completed items
/// - `settle`: 1 to 2 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub short: DelayRange,
    pub cooldown: DelayRange,
    /// Cooldown cadence; `0` disables cooldowns.
    pub cooldown_every: u32,
    /// Pause after a navigation before the page is read.
    pub settle: DelayRange,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            short: DelayRange::new(DEFAULT_SHORT_MIN, DEFAULT_SHORT_MAX),
            cooldown: DelayRange::new(DEFAULT_COOLDOWN_MIN, DEFAULT_COOLDOWN_MAX),
            cooldown_every: DEFAULT_COOLDOWN_EVERY,
            settle: DelayRange::new(DEFAULT_SETTLE_MIN, DEFAULT_SETTLE_MAX),
        }
    }
}

impl PacingPolicy {
    /// A policy that never waits.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            short: DelayRange::zero(),
            cooldown: DelayRange::zero(),
            cooldown_every: 0,
            settle: DelayRange::zero(),
        }
    }

    /// Returns true if the policy never waits.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.short.max.is_zero() && self.cooldown.max.is_zero() && self.settle.max.is_zero()
    }

    /// Delay class that follows `completed` successfully processed items.
    #[must_use]
    pub fn kind_after(&self, completed: u32) -> DelayKind {
        if self.cooldown_every > 0 && completed > 0 && completed % self.cooldown_every == 0 {
            DelayKind::Cooldown
        } else {
            DelayKind::Short
        }
    }

    /// Draws the delay that follows `completed` successfully processed items.
    #[must_use]
    pub fn next_delay(&self, completed: u32) -> (DelayKind, Duration) {
        self.next_delay_with_rng(completed, &mut rand::thread_rng())
    }

    /// Like [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with_rng(&self, completed: u32, rng: &mut impl Rng) -> (DelayKind, Duration) {
        let kind = self.kind_after(completed);
        let range = match kind {
            DelayKind::Short => self.short,
            DelayKind::Cooldown => self.cooldown,
        };
        (kind, range.sample(rng))
    }

    /// Draws a short delay (between listing pages).
    #[must_use]
    pub fn short_delay(&self) -> Duration {
        self.short.sample(&mut rand::thread_rng())
    }

    /// Draws a settle delay (after a navigation).
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle.sample(&mut rand::thread_rng())
    }

    /// Sleeps for the delay that follows `completed` items.
    pub async fn pause_after(&self, completed: u32) -> DelayKind {
        let (kind, delay) = self.next_delay(completed);
        sleep_logged(kind, delay).await;
        kind
    }

    /// Sleeps for a short delay.
    pub async fn pause_short(&self) {
        sleep_logged(DelayKind::Short, self.short_delay()).await;
    }

    /// Sleeps for a settle delay.
    pub async fn settle(&self) {
        let delay = self.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn sleep_logged(kind: DelayKind, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    match kind {
        DelayKind::Cooldown => info!(delay_ms = duration_millis(delay), "cooling down"),
        DelayKind::Short => debug!(delay_ms = duration_millis(delay), "pacing delay"),
    }
    tokio::time::sleep(delay).await;
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
