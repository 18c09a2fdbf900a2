use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    batch_encoder::PlainInteger,
    error::{Error, Result},
    util,
    Modulus,
};
use super::bsgs::{bsgs_index, find_best_bsgs_ratio, BsgsRatio};

/// The non-zero diagonals of a linear map on the slot matrix.
///
/// Diagonal `d` holds, for every slot `x` of both rows, the coefficient that
/// multiplies the input slot `x + d` of the same row. The indices `d` and
/// `d - slots` name the same diagonal, with `slots` the row length; either may
/// be used. Vectors shorter than the `2 * slots` slots are zero padded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagonals<T = u64>(BTreeMap<isize, Vec<T>>);

impl<T: PlainInteger> Diagonals<T> {

    /// An empty map.
    pub fn new() -> Self {
        Diagonals(BTreeMap::new())
    }

    /// Sets diagonal `index`, returning the previous vector stored under it.
    pub fn insert(&mut self, index: isize, values: Vec<T>) -> Option<Vec<T>> {
        self.0.insert(index, values)
    }

    /// The vector stored under exactly `index`.
    pub fn get(&self, index: isize) -> Option<&Vec<T>> {
        self.0.get(&index)
    }

    /// Number of stored diagonals.
    pub fn len(&self) -> usize {self.0.len()}

    /// Whether no diagonal is stored.
    pub fn is_empty(&self) -> bool {self.0.is_empty()}

    /// Iterates over the diagonals in increasing index order.
    pub fn iter(&self) -> impl Iterator<Item = (isize, &[T])> + '_ {
        self.0.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    /// The stored indices, sorted.
    pub fn index_list(&self) -> Vec<isize> {
        self.0.keys().copied().collect()
    }

    /// Diagonal `index`, falling back to its alias `index - slots` (or
    /// `index + slots` for negative indices).
    pub fn at(&self, index: isize, slots: usize) -> Result<&[T]> {
        if let Some(v) = self.0.get(&index) {
            return Ok(v);
        }
        let alias = match index {
            i if i > 0 => i - slots as isize,
            i if i < 0 => i + slots as isize,
            _ => return Err(Error::InvalidDiagonals("diagonal 0 does not exist".to_string())),
        };
        self.0.get(&alias)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::InvalidDiagonals(format!("neither diagonal {} nor {} exists", index, alias)))
    }

    /// Applies the map to the slots of `vector`, of length `2 * slots`, modulo `t`.
    ///
    /// The sum is arranged in the same baby-step giant-step grid as the
    /// homomorphic evaluation, which yields the same values for any grid.
    pub fn evaluate_plain(&self, vector: &[T], t: &Modulus) -> Result<Vec<u64>> {
        if vector.is_empty() || vector.len() % 2 != 0 {
            return Err(Error::InvalidOperand(format!(
                "a vector of {} values does not fill two rows", vector.len()
            )));
        }
        let slots = vector.len() / 2;
        let keys = self.index_list();
        let n1 = find_best_bsgs_ratio(&keys, slots, BsgsRatio::Optimal);
        let grid = bsgs_index(keys, slots, n1);

        let vector: Vec<u64> = vector.iter().map(|v| v.reduce(t)).collect();
        let mut result = vec![0u64; 2 * slots];
        let mut tmp = vec![0u64; 2 * slots];
        for (&j, babies) in grid.index.iter() {
            let rot = (slots - j) % slots;
            tmp.iter_mut().for_each(|x| *x = 0);
            for &i in babies {
                let diagonal = self.at((i + j) as isize, slots)?;
                if diagonal.len() > 2 * slots {
                    return Err(Error::InvalidDiagonals(format!(
                        "diagonal {} has {} values for {} slots", i + j, diagonal.len(), 2 * slots
                    )));
                }
                for row in 0..2 {
                    let offset = row * slots;
                    for x in 0..slots {
                        let Some(d) = diagonal.get(offset + (x + rot) % slots) else {
                            continue;
                        };
                        let product = util::multiply_u64_mod(vector[offset + (x + i) % slots], d.reduce(t), t);
                        tmp[offset + x] = util::add_u64_mod(tmp[offset + x], product, t);
                    }
                }
            }
            for row in 0..2 {
                let offset = row * slots;
                for x in 0..slots {
                    result[offset + x] = util::add_u64_mod(result[offset + x], tmp[offset + (x + j) % slots], t);
                }
            }
        }
        Ok(result)
    }

}

impl<T> FromIterator<(isize, Vec<T>)> for Diagonals<T> {
    fn from_iter<I: IntoIterator<Item = (isize, Vec<T>)>>(iter: I) -> Self {
        Diagonals(iter.into_iter().collect())
    }
}

/// Moves the slot `from` of a row to the slot `to`, multiplied by `scaling`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationMapping<T = u64> {
    /// Source column.
    pub from: usize,
    /// Destination column.
    pub to: usize,
    /// Factor applied on the way.
    pub scaling: T,
}

/// A partial permutation of the columns of each of the two rows.
///
/// For instance the rows `[[a, b], [c, d]]` are mapped to `[[b, a], [c, d]]` by
/// `[[0 -> 1, 1 -> 0], [0 -> 0, 1 -> 1]]`. Columns that are never a
/// destination end up zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permutation<T = u64>(pub [Vec<PermutationMapping<T>>; 2]);

impl<T: PlainInteger + Default> Permutation<T> {

    /// The permutation moving every `to` back to its `from`, with the same scalings.
    pub fn transpose(&self) -> Self {
        Permutation(self.0.clone().map(|row| {
            row.into_iter().map(|m| PermutationMapping { from: m.to, to: m.from, scaling: m.scaling }).collect()
        }))
    }

    /// The diagonals of the permutation on a `2 x 2^(log_slots - 1)` slot matrix.
    ///
    /// Positions are taken modulo the row length.
    pub fn get_diagonals(&self, log_slots: usize) -> Diagonals<T> {
        let slots = 1usize << log_slots.saturating_sub(1);
        let mask = slots - 1;
        let mut diagonals: BTreeMap<isize, Vec<T>> = BTreeMap::new();
        for (row, mappings) in self.0.iter().enumerate() {
            let offset = row * slots;
            for m in mappings {
                let (from, to) = (m.from & mask, m.to & mask);
                let index = (slots + from - to) & mask;
                let diagonal = diagonals.entry(index as isize).or_insert_with(|| vec![T::default(); 2 * slots]);
                diagonal[to + offset] = m.scaling;
            }
        }
        Diagonals(diagonals)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{seq::SliceRandom, Rng, SeedableRng};

    fn modulus() -> Modulus {
        Modulus::new(65537)
    }

    #[test]
    fn test_at_aliasing() {
        let mut diagonals = Diagonals::new();
        diagonals.insert(-1, vec![1u64; 16]);
        diagonals.insert(2, vec![2u64; 16]);
        assert_eq!(diagonals.at(-1, 8).unwrap()[0], 1);
        assert_eq!(diagonals.at(7, 8).unwrap()[0], 1);
        assert_eq!(diagonals.at(-6, 8).unwrap()[0], 2);
        assert!(matches!(diagonals.at(3, 8), Err(Error::InvalidDiagonals(_))));
        assert!(matches!(diagonals.at(0, 8), Err(Error::InvalidDiagonals(_))));
        assert_eq!(diagonals.index_list(), vec![-1, 2]);
    }

    #[test]
    fn test_evaluate_plain_tridiagonal() {
        let diagonals: Diagonals = [-1, 0, 1].into_iter().map(|k| (k, vec![1u64; 16])).collect();
        let values: Vec<u64> = (1..=16).collect();
        let result = diagonals.evaluate_plain(&values, &modulus()).unwrap();
        for row in 0..2 {
            let v = &values[row * 8..(row + 1) * 8];
            for x in 0..8 {
                assert_eq!(result[row * 8 + x], v[(x + 7) % 8] + v[x] + v[(x + 1) % 8]);
            }
        }
    }

    #[test]
    fn test_evaluate_plain_signed() {
        let diagonals: Diagonals<i64> = [(0, vec![-1i64; 4])].into_iter().collect();
        let result = diagonals.evaluate_plain(&[3i64, 4, 5, 6], &modulus()).unwrap();
        assert_eq!(result, vec![65534, 65533, 65532, 65531]);
        assert!(diagonals.evaluate_plain(&[1i64, 2, 3], &modulus()).is_err());
    }

    #[test]
    fn test_permutation_diagonals() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let slots = 8;
        let t = modulus();
        let permutation = Permutation([0, 1].map(|_| {
            let mut to: Vec<usize> = (0..slots).collect();
            to.shuffle(&mut rng);
            to.truncate(slots / 2);
            to.into_iter().enumerate()
                .map(|(from, to)| PermutationMapping { from, to, scaling: rng.gen_range(1..65537u64) })
                .collect()
        }));
        let diagonals = permutation.get_diagonals(4);
        let values: Vec<u64> = (0..2 * slots as u64).map(|_| rng.gen_range(0..65537)).collect();

        let mut expected = vec![0u64; 2 * slots];
        for (row, mappings) in permutation.0.iter().enumerate() {
            for m in mappings {
                expected[row * slots + m.to] = util::multiply_u64_mod(values[row * slots + m.from], m.scaling, &t);
            }
        }
        assert_eq!(diagonals.evaluate_plain(&values, &t).unwrap(), expected);
    }

    #[test]
    fn test_permutation_positions_wrap() {
        let wrapped = Permutation([
            vec![PermutationMapping { from: 9, to: 15, scaling: 3u64 }, PermutationMapping { from: 0, to: 12, scaling: 5 }],
            vec![PermutationMapping { from: 2, to: 26, scaling: 7 }],
        ]);
        let reduced = Permutation([
            vec![PermutationMapping { from: 1, to: 7, scaling: 3u64 }, PermutationMapping { from: 0, to: 4, scaling: 5 }],
            vec![PermutationMapping { from: 2, to: 2, scaling: 7 }],
        ]);
        let diagonals = wrapped.get_diagonals(4);
        assert_eq!(diagonals, reduced.get_diagonals(4));
        assert_eq!(diagonals.index_list(), vec![0, 2, 4]);
        assert_eq!(diagonals.get(4).unwrap()[4], 5);
        assert_eq!(diagonals.get(0).unwrap()[8 + 2], 7);
    }

    #[test]
    fn test_permutation_transpose_round_trip() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let slots = 8;
        let t = modulus();
        let permutation = Permutation([0, 1].map(|_| {
            let mut to: Vec<usize> = (0..slots).collect();
            to.shuffle(&mut rng);
            to.into_iter().enumerate().map(|(from, to)| PermutationMapping { from, to, scaling: 1u64 }).collect()
        }));
        let values: Vec<u64> = (0..2 * slots as u64).collect();
        let forward = permutation.get_diagonals(4).evaluate_plain(&values, &t).unwrap();
        let back = permutation.transpose().get_diagonals(4).evaluate_plain(&forward, &t).unwrap();
        assert_eq!(back, values);
    }
}
