//! Reassignment Schedule
//!
//! Computes the global-step thresholds (in example-count units) at which
//! pseudo-labels must be recomputed, and filters already-passed thresholds
//! when resuming from a checkpoint. The thresholds form a stack consumed
//! from the tail; the head is a sentinel beyond the last real epoch, so the
//! "no more events" condition stays well-defined until the run ends.

use crate::utils::error::{Result, SelfLabelError};

/// Descending stack of reassignment thresholds with a sentinel at the head
#[derive(Debug, Clone, PartialEq)]
pub struct ReassignmentSchedule {
    /// `thresholds[0]` is the sentinel; the tail is the next due threshold
    thresholds: Vec<f64>,
}

impl ReassignmentSchedule {
    /// Compute the full schedule for a run.
    ///
    /// The `num_events` thresholds follow a quadratic ramp over
    /// `[0, (num_epochs + 1.01) * N]`, denser early in training, using the
    /// interior points `(i / (num_events + 1))^2` so every threshold is
    /// strictly positive and strictly below the ramp's upper bound. The
    /// sentinel `(num_epochs + 2) * N` lies past the last real epoch and is
    /// never legitimately reached.
    pub fn compute(num_epochs: usize, num_examples: usize, num_events: usize) -> Self {
        let n = num_examples as f64;
        let scale = n * (num_epochs as f64 + 1.01);
        let sentinel = (num_epochs as f64 + 2.0) * n;

        let mut thresholds = Vec::with_capacity(num_events + 1);
        thresholds.push(sentinel);
        for i in (1..=num_events).rev() {
            let frac = i as f64 / (num_events as f64 + 1.0);
            thresholds.push(scale * frac * frac);
        }

        Self { thresholds }
    }

    /// Drop thresholds that logically fired before `first_epoch`.
    ///
    /// Keeps non-sentinel thresholds `t` with `t / N >= first_epoch`; the
    /// sentinel always survives. When `first_epoch` lies past every real
    /// threshold only the sentinel remains, which is a valid terminal state:
    /// no further reassignment will occur for the rest of the run.
    pub fn resume_filter(&mut self, first_epoch: usize, num_examples: usize) {
        let n = num_examples as f64;
        let sentinel = self.thresholds[0];
        self.thresholds
            .retain(|&t| t == sentinel || t / n >= first_epoch as f64);
    }

    /// Whether the next threshold is due at this global step
    pub fn is_due(&self, global_step: usize, batch_size: usize) -> bool {
        match self.thresholds.last() {
            Some(&next) => (global_step * batch_size) as f64 >= next,
            None => false,
        }
    }

    /// Pop the next due threshold.
    ///
    /// Fails with [`SelfLabelError::EmptySchedule`] when only the sentinel
    /// remains; callers must check [`is_due`](Self::is_due) first. The
    /// sentinel is astronomically large for sane configurations, but
    /// adversarially small schedules can reach it, so the guard is real.
    pub fn pop(&mut self) -> Result<f64> {
        if self.thresholds.len() <= 1 {
            return Err(SelfLabelError::EmptySchedule);
        }
        // Unreachable fallback: len > 1 was just checked.
        self.thresholds.pop().ok_or(SelfLabelError::EmptySchedule)
    }

    /// Number of real (non-sentinel) thresholds still pending
    pub fn remaining_events(&self) -> usize {
        self.thresholds.len().saturating_sub(1)
    }

    /// The sentinel threshold
    pub fn sentinel(&self) -> f64 {
        self.thresholds[0]
    }

    /// Pending thresholds in epoch units, for logging
    pub fn pending_epochs(&self, num_examples: usize) -> Vec<f64> {
        let n = num_examples as f64;
        self.thresholds[1..].iter().rev().map(|t| t / n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_shape_and_bounds() {
        for (epochs, n, events) in [(200, 1_281_167, 100), (3, 1000, 2), (10, 500, 1), (5, 64, 7)] {
            let schedule = ReassignmentSchedule::compute(epochs, n, events);
            assert_eq!(schedule.remaining_events(), events);
            assert_eq!(schedule.sentinel(), (epochs as f64 + 2.0) * n as f64);

            let values = &schedule.thresholds;
            // Strictly descending after the sentinel.
            for pair in values[1..].windows(2) {
                assert!(pair[0] > pair[1], "not strictly descending: {:?}", pair);
            }
            // Smallest strictly positive, largest strictly under the ramp cap.
            let cap = (epochs as f64 + 1.01) * n as f64;
            assert!(*values.last().unwrap() > 0.0);
            assert!(values[1] < cap);
            // Sentinel dominates every real threshold.
            assert!(values[1] < schedule.sentinel());
        }
    }

    #[test]
    fn test_resume_filter_noop_at_epoch_zero() {
        let original = ReassignmentSchedule::compute(20, 1000, 10);
        let mut filtered = original.clone();
        filtered.resume_filter(0, 1000);
        assert_eq!(filtered, original);
    }

    #[test]
    fn test_resume_filter_past_end_keeps_only_sentinel() {
        let mut schedule = ReassignmentSchedule::compute(20, 1000, 10);
        schedule.resume_filter(30, 1000);
        assert_eq!(schedule.remaining_events(), 0);
        assert_eq!(schedule.sentinel(), 22.0 * 1000.0);
        // Degenerate but valid: nothing is due, popping is an error.
        assert!(!schedule.is_due(10_000_000, 256));
        assert!(matches!(schedule.pop(), Err(SelfLabelError::EmptySchedule)));
    }

    #[test]
    fn test_resume_filter_partial() {
        let mut schedule = ReassignmentSchedule::compute(10, 100, 4);
        // Thresholds in epoch units: 11.01 * (i/5)^2 for i=1..4
        // = 0.4404, 1.7616, 3.9636, 7.0464
        schedule.resume_filter(2, 100);
        assert_eq!(schedule.remaining_events(), 2);
        let pending = schedule.pending_epochs(100);
        assert!(pending.iter().all(|&e| e >= 2.0));
    }

    #[test]
    fn test_thresholds_consumed_in_ascending_step_order() {
        let mut schedule = ReassignmentSchedule::compute(4, 100, 3);
        let mut popped = Vec::new();
        while schedule.remaining_events() > 0 {
            popped.push(schedule.pop().unwrap());
        }
        for pair in popped.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(matches!(schedule.pop(), Err(SelfLabelError::EmptySchedule)));
    }

    #[test]
    fn test_is_due_against_tail() {
        let mut schedule = ReassignmentSchedule::compute(3, 1000, 2);
        // Ramp scale 4010: thresholds 445.55.. (i=1) and 1782.22.. (i=2).
        assert!(!schedule.is_due(4, 100)); // 400 < 445.55
        assert!(schedule.is_due(5, 100)); // 500 >= 445.55
        schedule.pop().unwrap();
        assert!(!schedule.is_due(17, 100)); // 1700 < 1782.22
        assert!(schedule.is_due(18, 100)); // 1800 >= 1782.22
        schedule.pop().unwrap();
        // Only the sentinel (5000 examples * epochs...) remains.
        assert!(!schedule.is_due(39, 100));
    }

    #[test]
    fn test_each_threshold_fires_at_most_once() {
        let mut schedule = ReassignmentSchedule::compute(3, 1000, 2);
        let mut fired = 0;
        for step in 0..40 {
            if schedule.is_due(step, 100) {
                schedule.pop().unwrap();
                fired += 1;
                // Popping clears the trigger: the same step never double-fires.
                assert!(!schedule.is_due(step, 100));
            }
        }
        assert_eq!(fired, 2);
    }
}
