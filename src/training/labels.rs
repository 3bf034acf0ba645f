//! Pseudo-Label Store
//!
//! Owns the current pseudo-label assignment: one cluster id per training
//! example per head, stored as a fixed-shape row-major matrix. Rows are only
//! ever replaced wholesale by the assignment updater; there is no incremental
//! edit path.

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SelfLabelError};

/// The `num_heads x N` pseudo-label matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAssignment {
    num_heads: usize,
    num_examples: usize,
    clusters_per_head: usize,
    /// Row-major storage: `labels[head * num_examples + example]`
    labels: Vec<i64>,
}

impl LabelAssignment {
    /// Create a balanced-by-construction starting assignment.
    ///
    /// Each head independently assigns label `i mod clusters_per_head` to
    /// example `i` and then shuffles its own row, so heads start balanced
    /// and mutually decorrelated.
    pub fn initialize(
        num_heads: usize,
        num_examples: usize,
        clusters_per_head: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut labels = Vec::with_capacity(num_heads * num_examples);
        for _ in 0..num_heads {
            let mut row: Vec<i64> = (0..num_examples)
                .map(|i| (i % clusters_per_head) as i64)
                .collect();
            row.shuffle(rng);
            labels.extend(row);
        }

        Self {
            num_heads,
            num_examples,
            clusters_per_head,
            labels,
        }
    }

    /// Label of one example under one head
    pub fn get(&self, head: usize, example: usize) -> i64 {
        self.labels[head * self.num_examples + example]
    }

    /// Labels of a batch of examples under one head
    pub fn targets_for(&self, head: usize, examples: &[usize]) -> Vec<i64> {
        examples.iter().map(|&i| self.get(head, i)).collect()
    }

    /// One head's full label row
    pub fn row(&self, head: usize) -> &[i64] {
        let start = head * self.num_examples;
        &self.labels[start..start + self.num_examples]
    }

    /// Replace one head's labels atomically.
    ///
    /// The row is validated before any write, so a rejected row leaves the
    /// previous assignment untouched.
    pub fn set_row(&mut self, head: usize, row: Vec<i64>) -> Result<()> {
        if head >= self.num_heads {
            return Err(SelfLabelError::Solver(format!(
                "head {} out of range ({} heads)",
                head, self.num_heads
            )));
        }
        if row.len() != self.num_examples {
            return Err(SelfLabelError::Solver(format!(
                "assignment row for head {} has {} entries, expected {}",
                head,
                row.len(),
                self.num_examples
            )));
        }
        if let Some(&bad) = row
            .iter()
            .find(|&&l| l < 0 || l >= self.clusters_per_head as i64)
        {
            return Err(SelfLabelError::Solver(format!(
                "assignment row for head {} contains cluster id {} outside [0, {})",
                head, bad, self.clusters_per_head
            )));
        }

        let start = head * self.num_examples;
        self.labels[start..start + self.num_examples].copy_from_slice(&row);
        Ok(())
    }

    /// How often each cluster id occurs in one head's row
    pub fn cluster_counts(&self, head: usize) -> Vec<usize> {
        let mut counts = vec![0usize; self.clusters_per_head];
        for &label in self.row(head) {
            counts[label as usize] += 1;
        }
        counts
    }

    /// Fail if the stored shape does not match the given configuration.
    ///
    /// Called when restoring from checkpoint; continuing with an
    /// incompatible matrix would silently corrupt training.
    pub fn validate_shape(
        &self,
        num_heads: usize,
        num_examples: usize,
        clusters_per_head: usize,
    ) -> Result<()> {
        if self.num_heads != num_heads
            || self.num_examples != num_examples
            || self.clusters_per_head != clusters_per_head
        {
            return Err(SelfLabelError::LabelShapeMismatch {
                found_heads: self.num_heads,
                found_examples: self.num_examples,
                found_clusters: self.clusters_per_head,
                want_heads: num_heads,
                want_examples: num_examples,
                want_clusters: clusters_per_head,
            });
        }
        Ok(())
    }

    /// Number of heads
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Number of examples per head
    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    /// Cluster vocabulary size per head
    pub fn clusters_per_head(&self) -> usize {
        self.clusters_per_head
    }
}
