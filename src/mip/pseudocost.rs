//! Pseudocost learning for branching-candidate selection.

use crate::{E, I};

/// Per-column average objective gain per unit of fractional rounding, kept
/// separately for the up and down directions.
#[derive(Debug, Clone)]
pub struct Pseudocost {
    up_sum: Vec<E>,
    up_count: Vec<I>,
    down_sum: Vec<E>,
    down_count: Vec<I>,
    min_reliable: I,
}

impl Pseudocost {
    pub fn new(num_col: I, min_reliable: I) -> Self {
        Self {
            up_sum: vec![0.0; num_col],
            up_count: vec![0; num_col],
            down_sum: vec![0.0; num_col],
            down_count: vec![0; num_col],
            min_reliable,
        }
    }

    /// Records an observed per-unit-fraction gain for a direction.
    pub fn observe(&mut self, col: I, up: bool, unit_gain: E) {
        let unit_gain = unit_gain.max(0.0);
        if up {
            self.up_sum[col] += unit_gain;
            self.up_count[col] += 1;
        } else {
            self.down_sum[col] += unit_gain;
            self.down_count[col] += 1;
        }
    }

    /// Mean up gain per unit, with an optimistic default before any sample.
    pub fn up_cost(&self, col: I) -> E {
        if self.up_count[col] == 0 {
            self.global_mean()
        } else {
            self.up_sum[col] / self.up_count[col] as E
        }
    }

    pub fn down_cost(&self, col: I) -> E {
        if self.down_count[col] == 0 {
            self.global_mean()
        } else {
            self.down_sum[col] / self.down_count[col] as E
        }
    }

    fn global_mean(&self) -> E {
        let total: E = self.up_sum.iter().sum::<E>() + self.down_sum.iter().sum::<E>();
        let count = self.up_count.iter().sum::<I>() + self.down_count.iter().sum::<I>();
        if count == 0 { 1.0 } else { (total / count as E).max(1e-6) }
    }

    /// Whether both directions carry enough samples to trust the estimate.
    pub fn is_reliable(&self, col: I) -> bool {
        self.up_count[col] >= self.min_reliable && self.down_count[col] >= self.min_reliable
    }

    pub fn num_samples(&self, col: I) -> (I, I) {
        (self.down_count[col], self.up_count[col])
    }

    /// Product-style branching score of a fractional value.
    pub fn score(&self, col: I, fraction: E) -> E {
        let down = fraction * self.down_cost(col);
        let up = (1.0 - fraction) * self.up_cost(col);
        // Product rule with a small convex floor so one-sided zeros do not
        // blank the score.
        down.max(1e-10) * up.max(1e-10)
    }

    /// Pseudocost estimate of the objective after rounding `col` in the
    /// given direction.
    pub fn estimate(&self, col: I, fraction: E, up: bool) -> E {
        if up {
            (1.0 - fraction) * self.up_cost(col)
        } else {
            fraction * self.down_cost(col)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_accumulate_per_direction() {
        let mut pc = Pseudocost::new(2, 2);
        pc.observe(0, true, 4.0);
        pc.observe(0, true, 2.0);
        pc.observe(0, false, 1.0);
        assert_eq!(pc.up_cost(0), 3.0);
        assert_eq!(pc.down_cost(0), 1.0);
        assert!(!pc.is_reliable(0));
        pc.observe(0, true, 0.0);
        pc.observe(0, false, 0.0);
        assert!(pc.is_reliable(0));
    }

    #[test]
    fn unseen_column_borrows_global_mean() {
        let mut pc = Pseudocost::new(2, 1);
        pc.observe(0, true, 10.0);
        assert_eq!(pc.up_cost(1), 10.0);
    }

    #[test]
    fn score_prefers_balanced_gains() {
        let mut pc = Pseudocost::new(2, 1);
        pc.observe(0, true, 1.0);
        pc.observe(0, false, 1.0);
        pc.observe(1, true, 2.0);
        pc.observe(1, false, 0.001);
        let balanced = pc.score(0, 0.5);
        let lopsided = pc.score(1, 0.5);
        assert!(balanced > lopsided);
    }
}
