//! Adaptive target block size, keyed off total store size (spec.md §4.6).

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Picks a target `EmailBatch` block size from the piecewise-constant
/// table in spec.md §4.6, plus the soft-cap rule that governs when a
/// batch must flush.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveSizer {
    /// Multiplier on `target_size` before a batch is forced to flush
    /// even though the next email would still technically fit.
    soft_cap_factor: f64,
}

impl Default for AdaptiveSizer {
    fn default() -> Self {
        AdaptiveSizer { soft_cap_factor: 1.1 }
    }
}

impl AdaptiveSizer {
    /// Build a sizer with a non-default soft-cap factor (tests only need
    /// the default; exposed for `EngineOptions` completeness).
    pub fn with_soft_cap_factor(soft_cap_factor: f64) -> Self {
        AdaptiveSizer { soft_cap_factor }
    }

    /// Target batch size for a store whose current total on-disk size is
    /// `store_size_bytes`.
    pub fn target_size_bytes(&self, store_size_bytes: u64) -> u64 {
        if store_size_bytes < 5 * GIB {
            50 * MIB
        } else if store_size_bytes < 25 * GIB {
            100 * MIB
        } else if store_size_bytes < 100 * GIB {
            250 * MIB
        } else if store_size_bytes < 500 * GIB {
            500 * MIB
        } else {
            1024 * MIB
        }
    }

    /// Whether a pending batch of `pending_bytes` should flush before
    /// adding `next_email_bytes` more, given the current store size.
    ///
    /// A single email larger than the target always gets its own batch
    /// (never split across blocks): if the pending batch is currently
    /// empty, it is always allowed to accept the next email regardless
    /// of size.
    pub fn should_flush_before_adding(&self, pending_bytes: u64, next_email_bytes: u64, store_size_bytes: u64) -> bool {
        if pending_bytes == 0 {
            return false;
        }
        let target = self.target_size_bytes(store_size_bytes);
        let soft_cap = (target as f64 * self.soft_cap_factor) as u64;
        pending_bytes + next_email_bytes > soft_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_table_tier_matching_store_size() {
        let sizer = AdaptiveSizer::default();
        assert_eq!(sizer.target_size_bytes(0), 50 * MIB);
        assert_eq!(sizer.target_size_bytes(6 * GIB), 100 * MIB);
        assert_eq!(sizer.target_size_bytes(30 * GIB), 250 * MIB);
        assert_eq!(sizer.target_size_bytes(200 * GIB), 500 * MIB);
        assert_eq!(sizer.target_size_bytes(600 * GIB), 1024 * MIB);
    }

    #[test]
    fn an_empty_pending_batch_never_forces_a_flush() {
        let sizer = AdaptiveSizer::default();
        assert!(!sizer.should_flush_before_adding(0, 1024 * MIB, 0));
    }

    #[test]
    fn flushes_once_the_soft_cap_would_be_exceeded() {
        let sizer = AdaptiveSizer::default();
        let target = sizer.target_size_bytes(0);
        assert!(!sizer.should_flush_before_adding(target, 0, 0));
        assert!(sizer.should_flush_before_adding(target, (target / 10) + 1, 0));
    }
}
