//! Baby-step giant-step splitting of a set of diagonal indices.
//!
//! A diagonal `d` in `[0, slots)` is written `d = j + i` with `j` a multiple
//! of `n1` (the giant step) and `i < n1` (the baby step). Rotations by every
//! distinct `i` are computed once from a single decomposition of the input,
//! and every distinct non-zero `j` costs one more key switch on an
//! accumulated sum.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// How the giant step `n1` of a linear transformation is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BsgsRatio {
    /// No splitting: one rotation per non-zero diagonal.
    Disabled,
    /// The power of two minimising the number of distinct non-zero rotations.
    /// Ties go to the larger `n1`.
    #[default]
    Optimal,
    /// The smallest power of two for which the ratio of baby to giant
    /// rotations reaches `2^r`.
    LogRatio(i32),
    /// A fixed giant step, rounded up to a power of two and capped at the slot count.
    /// Zero disables the splitting.
    Fixed(usize),
}

/// The grid of a set of diagonals for a given giant step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BsgsIndex {
    /// Baby steps, sorted and distinct, grouped by giant step.
    pub index: BTreeMap<usize, Vec<usize>>,
    /// Distinct giant steps, sorted.
    pub giant_steps: Vec<usize>,
    /// Distinct baby steps, sorted.
    pub baby_steps: Vec<usize>,
}

impl BsgsIndex {

    /// Number of key switches the grid costs: non-zero baby plus non-zero giant steps.
    pub fn rotation_count(&self) -> usize {
        self.giant_steps.iter().filter(|&&j| j != 0).count()
            + self.baby_steps.iter().filter(|&&i| i != 0).count()
    }

}

/// Splits `indices`, taken modulo `slots`, into giant steps that are multiples
/// of `n1` and baby steps below `n1`.
///
/// `n1 == 0` gives the degenerate grid of the naive evaluation: a single giant
/// step 0 holding every diagonal.
///
/// ```rust
/// # use heathcliff_lintrans::bsgs_index;
/// let grid = bsgs_index([-1, 0, 1], 8, 2);
/// assert_eq!(grid.index[&0], vec![0, 1]);
/// assert_eq!(grid.index[&6], vec![1]);
/// assert_eq!(grid.giant_steps, vec![0, 6]);
/// assert_eq!(grid.baby_steps, vec![0, 1]);
/// ```
pub fn bsgs_index(indices: impl IntoIterator<Item = isize>, slots: usize, n1: usize) -> BsgsIndex {
    let mut grid: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    let mut babies = BTreeSet::new();
    for rot in indices {
        let rot = rot.rem_euclid(slots as isize) as usize;
        let (giant, baby) = if n1 == 0 {
            (0, rot)
        } else {
            let baby = rot % n1;
            (rot - baby, baby)
        };
        grid.entry(giant).or_default().insert(baby);
        babies.insert(baby);
    }
    BsgsIndex {
        giant_steps: grid.keys().copied().collect(),
        baby_steps: babies.into_iter().collect(),
        index: grid.into_iter().map(|(j, i)| (j, i.into_iter().collect())).collect(),
    }
}

/// The giant step used for `indices` over `slots` columns under `ratio`;
/// zero means the naive evaluation.
pub fn find_best_bsgs_ratio(indices: &[isize], slots: usize, ratio: BsgsRatio) -> usize {
    match ratio {
        BsgsRatio::Disabled => 0,
        BsgsRatio::Fixed(0) => 0,
        BsgsRatio::Fixed(n1) => n1.next_power_of_two().min(slots),
        BsgsRatio::Optimal => optimal_n1(indices, slots),
        BsgsRatio::LogRatio(r) => log_ratio_n1(indices, slots, r),
    }
}

fn optimal_n1(indices: &[isize], slots: usize) -> usize {
    let mut best = (usize::MAX, 1);
    let mut n1 = 1;
    while n1 <= slots {
        let cost = bsgs_index(indices.iter().copied(), slots, n1).rotation_count();
        if cost <= best.0 {
            best = (cost, n1);
        }
        n1 <<= 1;
    }
    best.1
}

fn log_ratio_n1(indices: &[isize], slots: usize, log_ratio: i32) -> usize {
    let max_ratio = 2f64.powi(log_ratio);
    let mut n1 = 1;
    while n1 < slots {
        let grid = bsgs_index(indices.iter().copied(), slots, n1);
        let giants = grid.giant_steps.len() as f64 - 1.0;
        let babies = grid.baby_steps.len() as f64 - 1.0;
        // no giant step left gives an infinite ratio, nothing at all gives NaN
        let ratio = babies / giants;
        if ratio == max_ratio {
            return n1;
        }
        if ratio > max_ratio {
            return (n1 >> 1).max(1);
        }
        n1 <<= 1;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bsgs_index_naive() {
        let grid = bsgs_index([-1, 0, 1, 3], 8, 0);
        assert_eq!(grid.giant_steps, vec![0]);
        assert_eq!(grid.index[&0], vec![0, 1, 3, 7]);
        assert_eq!(grid.rotation_count(), 3);
    }

    #[test]
    fn test_bsgs_index_aliasing() {
        // -1 and 7 name the same diagonal
        let grid = bsgs_index([-1, 7, 2], 8, 4);
        assert_eq!(grid.giant_steps, vec![0, 4]);
        assert_eq!(grid.index[&4], vec![3]);
        assert_eq!(grid.index[&0], vec![2]);
        assert_eq!(grid.baby_steps, vec![2, 3]);
    }

    #[test]
    fn test_bsgs_index_full() {
        let indices: Vec<isize> = (0..16).collect();
        let grid = bsgs_index(indices, 16, 4);
        assert_eq!(grid.giant_steps, vec![0, 4, 8, 12]);
        assert_eq!(grid.baby_steps, vec![0, 1, 2, 3]);
        assert!(grid.index.values().all(|babies| babies == &vec![0, 1, 2, 3]));
        assert_eq!(grid.rotation_count(), 6);
    }

    #[test]
    fn test_optimal_ratio() {
        let indices: Vec<isize> = (0..16).collect();
        assert_eq!(find_best_bsgs_ratio(&indices, 16, BsgsRatio::Optimal), 4);
        assert_eq!(find_best_bsgs_ratio(&[0], 16, BsgsRatio::Optimal), 16);
        // 1, 2 and 8 all cost two rotations
        assert_eq!(find_best_bsgs_ratio(&[-1, 0, 1], 8, BsgsRatio::Optimal), 8);
    }

    #[test]
    fn test_log_ratio() {
        let indices: Vec<isize> = (0..16).collect();
        // n1 = 2: 1 baby, 7 giants; n1 = 4: 3 babies, 3 giants; n1 = 8: 7 babies, 1 giant
        assert_eq!(find_best_bsgs_ratio(&indices, 16, BsgsRatio::LogRatio(0)), 4);
        assert_eq!(find_best_bsgs_ratio(&indices, 16, BsgsRatio::LogRatio(1)), 4);
        assert_eq!(find_best_bsgs_ratio(&[0, 1], 16, BsgsRatio::LogRatio(1)), 1);
    }

    #[test]
    fn test_fixed_and_disabled() {
        assert_eq!(find_best_bsgs_ratio(&[1, 2], 8, BsgsRatio::Disabled), 0);
        assert_eq!(find_best_bsgs_ratio(&[1, 2], 8, BsgsRatio::Fixed(0)), 0);
        assert_eq!(find_best_bsgs_ratio(&[1, 2], 8, BsgsRatio::Fixed(3)), 4);
        assert_eq!(find_best_bsgs_ratio(&[1, 2], 8, BsgsRatio::Fixed(64)), 8);
    }
}
