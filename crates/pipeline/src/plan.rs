//! Concurrency budget and group-of-frames planning
//!
//! Derives the encode concurrency budget from the global thread cap and
//! validates the segment/GoF alignment invariant before any job is scheduled.

use thiserror::Error;

/// Error type for plan validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A plan parameter that must be positive was zero
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    /// Segment size is not a whole number of encoder GoFs
    #[error(
        "segment-size ({segment_size}) must be a multiple of encoder-gof ({encoder_gof})"
    )]
    Misaligned { segment_size: u32, encoder_gof: u32 },
}

/// Global thread budget shared by all encoder instances
///
/// Immutable once derived for a run. `threads_per_instance` larger than
/// `parallelism` is corrected by clamping, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBudget {
    /// Total thread cap for encoding
    pub parallelism: u32,
    /// Worker threads handed to each encoder instance
    pub threads_per_instance: u32,
}

impl ThreadBudget {
    /// Create a thread budget, clamping `threads_per_instance` to `parallelism`
    pub fn new(parallelism: u32, threads_per_instance: u32) -> Result<Self, PlanError> {
        if parallelism == 0 {
            return Err(PlanError::NotPositive("parallelism"));
        }
        if threads_per_instance == 0 {
            return Err(PlanError::NotPositive("threads-per-instance"));
        }
        let threads_per_instance = if threads_per_instance > parallelism {
            tracing::warn!(
                requested = threads_per_instance,
                cap = parallelism,
                "capping threads-per-instance to the thread cap"
            );
            parallelism
        } else {
            threads_per_instance
        };
        Ok(Self {
            parallelism,
            threads_per_instance,
        })
    }

    /// Maximum number of encoder processes that may run at once
    pub fn max_concurrent_encodes(&self) -> u32 {
        std::cmp::max(1, self.parallelism / self.threads_per_instance)
    }
}

/// Segment/GoF alignment plan
///
/// The single cross-cutting invariant of the core: `segment_size` must be a
/// whole number of encoder GoFs, so segment boundaries always fall on GoF
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GofPlan {
    /// Frames per output segment
    pub segment_size: u32,
    /// Frames per encoder group-of-frames
    pub encoder_gof: u32,
}

impl GofPlan {
    /// Validate and create a GoF plan
    pub fn new(segment_size: u32, encoder_gof: u32) -> Result<Self, PlanError> {
        if segment_size == 0 {
            return Err(PlanError::NotPositive("segment-size"));
        }
        if encoder_gof == 0 {
            return Err(PlanError::NotPositive("encoder-gof"));
        }
        if segment_size % encoder_gof != 0 {
            return Err(PlanError::Misaligned {
                segment_size,
                encoder_gof,
            });
        }
        Ok(Self {
            segment_size,
            encoder_gof,
        })
    }

    /// Whole GoFs folded into each media segment
    pub fn gofs_per_segment(&self) -> u32 {
        self.segment_size / self.encoder_gof
    }

    /// Number of GoFs an encode of `total_frames` frames produces
    ///
    /// A trailing short GoF counts as a full entry.
    pub fn expected_gof_count(&self, total_frames: u64) -> u64 {
        total_frames.div_ceil(self.encoder_gof as u64)
    }

    /// Per-GoF frame counts for a tile of `total_frames` frames
    ///
    /// Every GoF holds `encoder_gof` frames except a possible trailing short
    /// GoF holding the remainder.
    pub fn gof_frame_counts(&self, total_frames: u64) -> Vec<u32> {
        let gof = self.encoder_gof as u64;
        let mut counts = Vec::with_capacity(self.expected_gof_count(total_frames) as usize);
        let mut remaining = total_frames;
        while remaining > 0 {
            let frames = remaining.min(gof) as u32;
            counts.push(frames);
            remaining -= frames as u64;
        }
        counts
    }

    /// Number of media segments produced for `gof_count` GoFs
    pub fn segment_count(&self, gof_count: u64) -> u64 {
        gof_count.div_ceil(self.gofs_per_segment() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_budget_examples() {
        let budget = ThreadBudget::new(4, 1).unwrap();
        assert_eq!(budget.max_concurrent_encodes(), 4);

        let budget = ThreadBudget::new(4, 3).unwrap();
        assert_eq!(budget.max_concurrent_encodes(), 1);
    }

    #[test]
    fn test_budget_clamps_oversized_threads() {
        let budget = ThreadBudget::new(4, 16).unwrap();
        assert_eq!(budget.threads_per_instance, 4);
        assert_eq!(budget.max_concurrent_encodes(), 1);
    }

    #[test]
    fn test_budget_rejects_zero() {
        assert_eq!(
            ThreadBudget::new(0, 1),
            Err(PlanError::NotPositive("parallelism"))
        );
        assert_eq!(
            ThreadBudget::new(4, 0),
            Err(PlanError::NotPositive("threads-per-instance"))
        );
    }

    #[test]
    fn test_gof_plan_rejects_misaligned() {
        let err = GofPlan::new(20, 16).unwrap_err();
        assert_eq!(
            err,
            PlanError::Misaligned {
                segment_size: 20,
                encoder_gof: 16
            }
        );
    }

    #[test]
    fn test_gof_plan_rejects_zero() {
        assert!(GofPlan::new(0, 16).is_err());
        assert!(GofPlan::new(16, 0).is_err());
    }

    #[test]
    fn test_gofs_per_segment() {
        assert_eq!(GofPlan::new(16, 16).unwrap().gofs_per_segment(), 1);
        assert_eq!(GofPlan::new(32, 16).unwrap().gofs_per_segment(), 2);
        assert_eq!(GofPlan::new(48, 8).unwrap().gofs_per_segment(), 6);
    }

    // 40 frames at a GoF of 16 yields three GoFs of 16, 16, and 8 frames.
    #[test]
    fn test_trailing_short_gof() {
        let plan = GofPlan::new(16, 16).unwrap();
        assert_eq!(plan.gof_frame_counts(40), vec![16, 16, 8]);
        assert_eq!(plan.expected_gof_count(40), 3);
        assert_eq!(plan.segment_count(3), 3);
    }

    #[test]
    fn test_exact_multiple_has_no_short_gof() {
        let plan = GofPlan::new(16, 16).unwrap();
        assert_eq!(plan.gof_frame_counts(48), vec![16, 16, 16]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // The derived budget is always at least 1 and never allows more
        // concurrent encodes than the thread cap.
        #[test]
        fn prop_budget_bounds(
            parallelism in 1u32..512,
            threads in 1u32..512,
        ) {
            let budget = ThreadBudget::new(parallelism, threads).unwrap();
            let max = budget.max_concurrent_encodes();
            prop_assert!(max >= 1);
            prop_assert!(max <= parallelism);
            prop_assert!(budget.threads_per_instance <= budget.parallelism);
        }

        // For any aligned plan, gofs_per_segment is a positive integer and a
        // K-GoF container yields ceil(K / gofs_per_segment) segments.
        #[test]
        fn prop_segment_count(
            encoder_gof in 1u32..64,
            multiple in 1u32..16,
            gof_count in 0u64..10_000,
        ) {
            let plan = GofPlan::new(encoder_gof * multiple, encoder_gof).unwrap();
            let per = plan.gofs_per_segment() as u64;
            prop_assert!(per >= 1);
            prop_assert_eq!(plan.segment_count(gof_count), gof_count.div_ceil(per));
        }

        // Per-GoF frame counts sum back to the total, and only the last GoF
        // may be short.
        #[test]
        fn prop_gof_frame_counts_partition(
            encoder_gof in 1u32..64,
            total_frames in 0u64..5_000,
        ) {
            let plan = GofPlan::new(encoder_gof, encoder_gof).unwrap();
            let counts = plan.gof_frame_counts(total_frames);
            prop_assert_eq!(counts.len() as u64, plan.expected_gof_count(total_frames));
            prop_assert_eq!(counts.iter().map(|&c| c as u64).sum::<u64>(), total_frames);
            for &c in counts.iter().take(counts.len().saturating_sub(1)) {
                prop_assert_eq!(c, encoder_gof);
            }
            if let Some(&last) = counts.last() {
                prop_assert!(last >= 1 && last <= encoder_gof);
            }
        }
    }
}
