//! Explicit deadline token.
//!
//! Deadlines flow as a value threaded through every suspending call rather
//! than as ambient runtime state. A `Deadline` is cheap to copy; derived
//! budgets (`shrink`, `cap`) produce new tokens without touching the parent.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn from_now(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    /// Zero once the deadline has passed; never negative.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The instant to hand to `tokio::time::timeout_at`.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// A deadline `margin` earlier than this one, floored at "now". Used to
    /// reserve a scoring budget out of the request deadline.
    pub fn shrink(&self, margin: Duration) -> Self {
        let now = Instant::now();
        let at = self.at.checked_sub(margin).unwrap_or(now).max(now);
        Self { at }
    }

    /// The earlier of this deadline and `now + max`. Used for per-request
    /// upstream budgets that are independent of (but never beyond) the
    /// overall deadline.
    pub fn cap(&self, max: Duration) -> Self {
        Self { at: self.at.min(Instant::now() + max) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down_and_floors_at_zero() {
        let d = Deadline::from_now(Duration::from_secs(10));
        assert!(!d.expired());
        assert_eq!(d.remaining(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(d.remaining(), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn shrink_reserves_margin_without_underflow() {
        let d = Deadline::from_now(Duration::from_secs(5));
        let shrunk = d.shrink(Duration::from_secs(2));
        assert_eq!(shrunk.remaining(), Duration::from_secs(3));

        let collapsed = d.shrink(Duration::from_secs(60));
        assert!(collapsed.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn cap_takes_the_earlier_bound() {
        let d = Deadline::from_now(Duration::from_secs(30));
        assert_eq!(d.cap(Duration::from_secs(5)).remaining(), Duration::from_secs(5));
        // A cap beyond the deadline leaves the deadline in charge.
        assert_eq!(d.cap(Duration::from_secs(60)).remaining(), Duration::from_secs(30));
    }
}
