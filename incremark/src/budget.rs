//! Slice budgets
//!
//! A budget bounds how much work one call to
//! `Marker::mark_until_budget_exhausted` may do. The marker reports work with
//! `step` and polls `is_over_budget` between units of work.

/// Outcome of a budgeted marking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncrementalProgress {
    /// Work remains. Call again to resume.
    NotFinished,
    /// The mark stack and the delayed marking list are both empty.
    Finished,
}

pub trait SliceBudget {
    /// Account for `work` units of marking work.
    fn step(&mut self, work: usize);

    fn is_over_budget(&self) -> bool;
}

impl<B: SliceBudget + ?Sized> SliceBudget for &mut B {
    #[inline]
    fn step(&mut self, work: usize) {
        (**self).step(work)
    }

    #[inline]
    fn is_over_budget(&self) -> bool {
        (**self).is_over_budget()
    }
}

/// Budget counting units of work. One popped cell entry is one unit, a range
/// entry costs one unit per slot traced.
#[derive(Clone, Copy, Debug)]
pub struct WorkBudget {
    remaining: usize,
}

impl WorkBudget {
    pub const fn new(work: usize) -> WorkBudget {
        WorkBudget { remaining: work }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl SliceBudget for WorkBudget {
    #[inline]
    fn step(&mut self, work: usize) {
        self.remaining = self.remaining.saturating_sub(work);
    }

    #[inline]
    fn is_over_budget(&self) -> bool {
        self.remaining == 0
    }
}

/// Budget that is never exhausted.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnlimitedBudget;

impl SliceBudget for UnlimitedBudget {
    #[inline]
    fn step(&mut self, _: usize) {}

    #[inline]
    fn is_over_budget(&self) -> bool {
        false
    }
}

#[cfg(feature = "std")]
pub use time::TimeBudget;

#[cfg(feature = "std")]
mod time {
    use std::time::{Duration, Instant};

    use super::SliceBudget;

    /// Number of work units between clock reads
    const CHECK_INTERVAL: usize = 1000;

    /// Budget bounded by wall-clock time. The clock is only read every
    /// `CHECK_INTERVAL` units of work.
    #[derive(Clone, Copy, Debug)]
    pub struct TimeBudget {
        deadline: Instant,
        work_since_check: usize,
        over_budget: bool,
    }

    impl TimeBudget {
        pub fn new(duration: Duration) -> TimeBudget {
            TimeBudget {
                deadline: Instant::now() + duration,
                work_since_check: 0,
                over_budget: duration.is_zero(),
            }
        }
    }

    impl SliceBudget for TimeBudget {
        fn step(&mut self, work: usize) {
            self.work_since_check += work;
            if self.work_since_check >= CHECK_INTERVAL {
                self.work_since_check = 0;
                self.over_budget = Instant::now() >= self.deadline;
            }
        }

        #[inline]
        fn is_over_budget(&self) -> bool {
            self.over_budget
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_budget() {
        let mut budget = WorkBudget::new(3);
        assert!(!budget.is_over_budget());
        budget.step(2);
        assert_eq!(budget.remaining(), 1);
        assert!(!budget.is_over_budget());
        budget.step(5);
        assert!(budget.is_over_budget());
    }

    #[test]
    fn test_unlimited_budget() {
        let mut budget = UnlimitedBudget;
        budget.step(usize::MAX);
        assert!(!budget.is_over_budget());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_time_budget() {
        let budget = TimeBudget::new(std::time::Duration::ZERO);
        assert!(budget.is_over_budget());

        let mut budget = TimeBudget::new(std::time::Duration::from_secs(3600));
        budget.step(10_000);
        assert!(!budget.is_over_budget());
    }
}
