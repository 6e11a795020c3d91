//! Retry delay computation and the sleeping seam used by the retry loop.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Largest exponent applied to the minimum delay.
const MAX_EXPONENT: u32 = 16;

/// Un-jittered delay before retry number `retry` (0-based).
///
/// `min + min * 2^retry`, capped at `max`.
pub fn base_delay(retry: u32, min: Duration, max: Duration) -> Duration {
    let multiplier = 1u32 << retry.min(MAX_EXPONENT);
    min.saturating_add(min.saturating_mul(multiplier)).min(max)
}

/// Subtracts a uniform jitter in `[0, delay / 4)` and floors the result at `min`.
pub fn apply_jitter<R: Rng>(delay: Duration, min: Duration, rng: &mut R) -> Duration {
    let range_ms = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    let jitter = if range_ms > 0 {
        Duration::from_millis(rng.random_range(0..range_ms))
    } else {
        Duration::ZERO
    };
    delay.saturating_sub(jitter).max(min)
}

/// Jittered delay before retry number `retry`.
pub fn retry_delay(retry: u32, min: Duration, max: Duration) -> Duration {
    apply_jitter(base_delay(retry, min, max), min, &mut rand::rng())
}

/// Puts the retry loop to sleep.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{rngs::StdRng, SeedableRng};

    use super::{apply_jitter, base_delay, retry_delay};

    const MIN: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_millis(5_000);

    #[test]
    fn base_delay_grows_until_cap() {
        assert_eq!(base_delay(0, MIN, MAX), Duration::from_millis(1_000));
        assert_eq!(base_delay(1, MIN, MAX), Duration::from_millis(1_500));
        assert_eq!(base_delay(2, MIN, MAX), Duration::from_millis(2_500));
        assert_eq!(base_delay(3, MIN, MAX), Duration::from_millis(4_500));
        assert_eq!(base_delay(4, MIN, MAX), MAX);
    }

    #[test]
    fn base_delay_is_monotonic() {
        let delays: Vec<_> = (0..40).map(|retry| base_delay(retry, MIN, MAX)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay >= MIN && *delay <= MAX));
    }

    #[test]
    fn huge_retry_count_does_not_overflow() {
        assert_eq!(base_delay(u32::MAX, MIN, MAX), MAX);
        assert_eq!(
            base_delay(u32::MAX, Duration::from_secs(u64::MAX / 2), Duration::MAX),
            Duration::MAX
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..10 {
            let base = base_delay(retry, MIN, MAX);
            for _ in 0..100 {
                let delay = apply_jitter(base, MIN, &mut rng);
                assert!(delay >= MIN, "{delay:?} below floor");
                assert!(delay <= base, "{delay:?} above {base:?}");
                assert!(delay > base - base / 4 || delay == MIN);
            }
        }
    }

    #[test]
    fn jitter_is_floored_at_min() {
        let mut rng = StdRng::seed_from_u64(1);
        let min = Duration::from_millis(100);
        for _ in 0..100 {
            assert!(apply_jitter(Duration::from_millis(101), min, &mut rng) >= min);
        }
    }

    #[test]
    fn retry_delay_uses_thread_rng() {
        let delay = retry_delay(2, MIN, MAX);
        assert!(delay >= MIN && delay <= base_delay(2, MIN, MAX));
    }
}
