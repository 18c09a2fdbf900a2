use std::{collections::{BTreeMap, BTreeSet}, marker::PhantomData};

use tracing::{debug, instrument};

use crate::{
    batch_encoder::PlainInteger,
    error::{Error, Result},
    BatchEncoder,
    LogDimensions,
    MetaData,
    Parameters,
    ParametersId,
    PolyQP,
    Scale,
};
use super::{
    bsgs::{bsgs_index, find_best_bsgs_ratio, BsgsIndex, BsgsRatio},
    diagonals::Diagonals,
};

/// Shape of a [LinearTransformation] before any diagonal is encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearTransformationParameters {
    /// Indices of the non-zero diagonals.
    pub indices: Vec<isize>,
    /// Level of the diagonals over Q. Ciphertexts above it are evaluated at this level.
    pub level_q: usize,
    /// Level of the diagonals over P.
    pub level_p: usize,
    /// Scale the diagonals are embedded with.
    pub scale: Scale,
    /// Choice of the giant step.
    pub ratio: BsgsRatio,
}

impl LinearTransformationParameters {

    /// Parameters at the largest levels of `params`.
    pub fn new(params: &Parameters, indices: Vec<isize>, scale: Scale, ratio: BsgsRatio) -> Self {
        LinearTransformationParameters {
            indices,
            level_q: params.max_level(),
            level_p: params.max_level_p(),
            scale,
            ratio,
        }
    }

    /// Sets the level over Q.
    pub fn with_level(mut self, level_q: usize) -> Self {
        self.level_q = level_q;
        self
    }

}

/// State of a [LinearTransformation] whose diagonals are allocated but empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocated;

/// State of a [LinearTransformation] ready for evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoded;

/// A linear map on the slots, stored as plaintext diagonals over QP.
///
/// With `n1 == 0` the diagonal `d` is stored under `d mod slots` as is. With a
/// giant step `n1`, diagonal `j + i` (`j` a multiple of `n1`, `i < n1`) is
/// stored rotated right by `j`, so that the evaluation can factor the rotation
/// by `j` out of the sum over `i`.
///
/// [LinearTransformation::encode] consumes the allocated value: a transformation
/// is encoded exactly once and its index list never changes afterwards.
#[derive(Clone, Debug)]
pub struct LinearTransformation<S = Encoded> {
    meta: MetaData,
    level_q: usize,
    level_p: usize,
    n1: usize,
    indices: Vec<isize>,
    grid: BsgsIndex,
    diagonals: BTreeMap<usize, PolyQP>,
    parameters_id: ParametersId,
    _state: PhantomData<S>,
}

impl<S> LinearTransformation<S> {

    /// Metadata of the diagonal plaintexts.
    pub fn meta(&self) -> &MetaData {&self.meta}

    /// Scale of the diagonals.
    pub fn scale(&self) -> Scale {self.meta.scale}

    /// Level over Q.
    pub fn level_q(&self) -> usize {self.level_q}

    /// Level over P.
    pub fn level_p(&self) -> usize {self.level_p}

    /// The giant step, zero for the naive evaluation.
    pub fn n1(&self) -> usize {self.n1}

    /// Shape of the slot matrix.
    pub fn log_dimensions(&self) -> LogDimensions {self.meta.log_dimensions}

    /// Number of columns of the slot matrix.
    pub fn slots(&self) -> usize {self.meta.log_dimensions.slots()}

    /// Indices of the non-zero diagonals, as given at allocation.
    pub fn indices(&self) -> &[isize] {&self.indices}

    /// The baby-step giant-step grid of the diagonals.
    pub fn bsgs_index(&self) -> &BsgsIndex {&self.grid}

    /// Galois elements of the rotations the evaluation needs, sorted.
    ///
    /// Without a giant step every non-zero diagonal is one rotation; otherwise
    /// the non-zero baby and giant steps are.
    pub fn galois_elements(&self, params: &Parameters) -> Vec<u64> {
        let rotations: BTreeSet<usize> = if self.n1 == 0 {
            self.grid.baby_steps.iter().copied().collect()
        } else {
            self.grid.giant_steps.iter().chain(&self.grid.baby_steps).copied().collect()
        };
        let elements: BTreeSet<u64> = rotations.into_iter()
            .filter(|&k| k != 0)
            .map(|k| params.galois_element(k as isize))
            .collect();
        elements.into_iter().collect()
    }

}

impl LinearTransformation<Allocated> {

    /// Allocates one zero plaintext per diagonal of `lt_params`, after choosing
    /// the giant step. Levels above those of `params` are capped.
    pub fn new(params: &Parameters, lt_params: &LinearTransformationParameters) -> Self {
        let log_dimensions = params.max_log_dimensions();
        let slots = log_dimensions.slots();
        let level_q = lt_params.level_q.min(params.max_level());
        let level_p = lt_params.level_p.min(params.max_level_p());

        let n1 = find_best_bsgs_ratio(&lt_params.indices, slots, lt_params.ratio);
        let grid = bsgs_index(lt_params.indices.iter().copied(), slots, n1);
        let diagonals = grid.index.iter()
            .flat_map(|(&j, babies)| babies.iter().map(move |&i| j + i))
            .map(|key| (key, PolyQP::new(params.n(), level_q, level_p)))
            .collect();
        debug!(n1, giants = grid.giant_steps.len(), babies = grid.baby_steps.len(), "linear transformation allocated");

        let mut meta = MetaData::new(log_dimensions);
        meta.scale = lt_params.scale;
        meta.is_montgomery = true;

        LinearTransformation {
            meta,
            level_q,
            level_p,
            n1,
            indices: lt_params.indices.clone(),
            grid,
            diagonals,
            parameters_id: *params.id(),
            _state: PhantomData,
        }
    }

    /// Embeds `diagonals` into the allocated plaintexts.
    ///
    /// Every diagonal of `diagonals` must have been allocated, under its own
    /// index or its alias, and hold at most `2 * slots` values. Allocated
    /// diagonals absent from `diagonals` stay zero.
    #[instrument(skip_all, fields(diagonals = diagonals.len()))]
    pub fn encode<T: PlainInteger>(
        mut self, encoder: &BatchEncoder, diagonals: &Diagonals<T>,
    ) -> Result<LinearTransformation<Encoded>> {
        let params = encoder.parameters();
        if params.id() != &self.parameters_id {
            return Err(Error::InvalidParameters(
                "encoder and linear transformation use different parameters".to_string()
            ));
        }
        let t = params.plaintext_modulus();
        let slots = self.slots();
        let scale = self.meta.scale;

        let grid = bsgs_index(diagonals.index_list(), slots, self.n1);
        let mut rotated = vec![0u64; 2 * slots];
        for (&j, babies) in grid.index.iter() {
            let rot = (slots - j) % slots;
            for &i in babies {
                let key = j + i;
                let values = diagonals.at(key as isize, slots)?;
                if values.len() > 2 * slots {
                    return Err(Error::InvalidDiagonals(format!(
                        "diagonal {} has {} values for {} slots", key, values.len(), 2 * slots
                    )));
                }
                let Some(plaintext) = self.diagonals.get_mut(&key) else {
                    return Err(Error::InvalidDiagonals(format!("diagonal {} was not allocated", key)));
                };
                // each row is rotated left by rot
                for (row, dst) in rotated.chunks_exact_mut(slots).enumerate() {
                    for (x, value) in dst.iter_mut().enumerate() {
                        *value = values.get(row * slots + (x + rot) % slots).map_or(0, |v| v.reduce(t));
                    }
                }
                encoder.embed(&rotated, scale, plaintext)?;
            }
        }

        let LinearTransformation { meta, level_q, level_p, n1, indices, grid, diagonals, parameters_id, .. } = self;
        Ok(LinearTransformation {
            meta, level_q, level_p, n1, indices, grid, diagonals, parameters_id, _state: PhantomData,
        })
    }

}

impl LinearTransformation<Encoded> {

    /// The plaintext stored under `key`, in `[0, slots)`.
    pub fn diagonal(&self, key: usize) -> Option<&PolyQP> {
        self.diagonals.get(&key)
    }

    pub(crate) fn parameters_id(&self) -> &ParametersId {&self.parameters_id}

}
