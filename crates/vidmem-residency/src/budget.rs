//! Budget queries and the eviction grace-period policy.
//!
//! The adapter's per-segment budget figures drive every paging decision.
//! Queries are expected to succeed; when one fails the manager logs it and
//! keeps running on the last successful snapshot, because the figures are
//! advisory and a stale number beats no number.
//!
//! # Grace period
//!
//! Aged eviction scales with memory pressure: at full pressure objects are
//! eligible after [`MIN_EVICTION_GRACE_SECS`], with zero pressure they may
//! idle up to [`MAX_EVICTION_GRACE_SECS`] before being trimmed. Linear in
//! between, clamped at both ends.

use parking_lot::Mutex;
use tracing::warn;

use crate::hal::{MemorySegment, PagingClock, VideoMemoryInfo, VideoMemoryProvider};

/// Shortest idle time before a resident object may be aged out.
pub const MIN_EVICTION_GRACE_SECS: f64 = 2.0;

/// Longest idle time an unreferenced resident object is kept around.
pub const MAX_EVICTION_GRACE_SECS: f64 = 60.0;

/// Grace-period bounds converted to clock ticks at construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GracePeriods {
    min_ticks: u64,
    max_ticks: u64,
}

impl GracePeriods {
    /// Convert the second-denominated bounds using the clock frequency.
    pub(crate) fn from_clock<C: PagingClock>(clock: &C) -> Self {
        let frequency = clock.ticks_per_second();
        Self {
            min_ticks: (frequency as f64 * MIN_EVICTION_GRACE_SECS) as u64,
            max_ticks: (frequency as f64 * MAX_EVICTION_GRACE_SECS) as u64,
        }
    }

    /// Grace period in ticks for the current local-segment pressure.
    ///
    /// Low pressure lets objects age longer before eviction to reduce
    /// paging thrash; high pressure trims aggressively. A zero budget
    /// counts as full pressure.
    pub(crate) fn eviction_grace_period(&self, local: &VideoMemoryInfo) -> u64 {
        let pressure = if local.budget == 0 {
            1.0
        } else {
            (local.current_usage as f64 / local.budget as f64).min(1.0)
        };
        let period = (self.max_ticks as f64 * (1.0 - pressure)) as u64;
        period.clamp(self.min_ticks, self.max_ticks)
    }
}

/// Adapter budget queries with a last-known-good fallback.
#[derive(Debug)]
pub(crate) struct BudgetCache<A> {
    provider: A,
    node_mask: u32,
    last_local: Mutex<VideoMemoryInfo>,
    last_non_local: Mutex<VideoMemoryInfo>,
}

impl<A: VideoMemoryProvider> BudgetCache<A> {
    pub(crate) fn new(provider: A, node_mask: u32) -> Self {
        Self {
            provider,
            node_mask,
            last_local: Mutex::new(VideoMemoryInfo::default()),
            last_non_local: Mutex::new(VideoMemoryInfo::default()),
        }
    }

    /// Current figures for `segment`, or the last successful snapshot when
    /// the adapter rejects the query.
    pub(crate) fn query(&self, segment: MemorySegment) -> VideoMemoryInfo {
        let cache = match segment {
            MemorySegment::Local => &self.last_local,
            MemorySegment::NonLocal => &self.last_non_local,
        };
        match self.provider.query_video_memory_info(self.node_mask, segment) {
            Ok(info) => {
                *cache.lock() = info;
                info
            }
            Err(err) => {
                let stale = *cache.lock();
                warn!(
                    %segment,
                    error = %err,
                    budget = stale.budget,
                    current_usage = stale.current_usage,
                    "budget query failed, using last known figures"
                );
                stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ResidencyError, ResidencyResult};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedClock(u64);

    impl PagingClock for FixedClock {
        fn now_ticks(&self) -> u64 {
            0
        }
        fn ticks_per_second(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn grace_bounds_scale_with_frequency() {
        let grace = GracePeriods::from_clock(&FixedClock(1_000));
        assert_eq!(grace.min_ticks, 2_000);
        assert_eq!(grace.max_ticks, 60_000);
    }

    #[test]
    fn grace_period_tracks_pressure() {
        let grace = GracePeriods::from_clock(&FixedClock(1_000));

        // No pressure: full grace.
        let idle = VideoMemoryInfo {
            budget: 100,
            current_usage: 0,
        };
        assert_eq!(grace.eviction_grace_period(&idle), 60_000);

        // Half pressure: half of max.
        let half = VideoMemoryInfo {
            budget: 100,
            current_usage: 50,
        };
        assert_eq!(grace.eviction_grace_period(&half), 30_000);

        // Full (or over-) pressure clamps to the minimum.
        let over = VideoMemoryInfo {
            budget: 100,
            current_usage: 250,
        };
        assert_eq!(grace.eviction_grace_period(&over), 2_000);

        // Zero budget counts as full pressure.
        let broke = VideoMemoryInfo {
            budget: 0,
            current_usage: 0,
        };
        assert_eq!(grace.eviction_grace_period(&broke), 2_000);
    }

    #[test]
    fn grace_period_clamps_to_minimum() {
        let grace = GracePeriods::from_clock(&FixedClock(1_000));
        // 98% pressure computes to 1_200 ticks, under the 2_000 floor.
        let info = VideoMemoryInfo {
            budget: 100,
            current_usage: 98,
        };
        assert_eq!(grace.eviction_grace_period(&info), 2_000);
    }

    struct FlakyAdapter {
        fail: AtomicBool,
    }

    impl VideoMemoryProvider for FlakyAdapter {
        fn query_video_memory_info(
            &self,
            _node_mask: u32,
            segment: MemorySegment,
        ) -> ResidencyResult<VideoMemoryInfo> {
            if self.fail.load(Ordering::Relaxed) {
                Err(ResidencyError::BudgetQueryFailed {
                    segment,
                    reason: "driver busy".into(),
                })
            } else {
                Ok(VideoMemoryInfo {
                    budget: 500,
                    current_usage: 123,
                })
            }
        }
    }

    #[test]
    fn budget_cache_serves_last_known_on_failure() {
        let cache = BudgetCache::new(
            FlakyAdapter {
                fail: AtomicBool::new(false),
            },
            0,
        );

        let fresh = cache.query(MemorySegment::Local);
        assert_eq!(fresh.budget, 500);

        cache.provider.fail.store(true, Ordering::Relaxed);
        let stale = cache.query(MemorySegment::Local);
        assert_eq!(stale, fresh);

        // A segment that never succeeded falls back to zeros.
        let unknown = cache.query(MemorySegment::NonLocal);
        assert_eq!(unknown, VideoMemoryInfo::default());
    }
}
