use rand::{Rng, distributions::Uniform, prelude::Distribution};

use crate::Modulus;

/** Error distribution tail cut, in standard deviations. */
pub const NOISE_DISTRIBUTION_WITH_MULTIPLIER: f64 = 6.0;

/** Normal distribution rejecting samples further than `max_deviation` from the mean. */
#[derive(Clone, Copy, Debug)]
pub struct ClippedNormal {
    normal: rand_distr::Normal<f64>,
    max_deviation: f64,
}

impl Distribution<f64> for ClippedNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let mean = self.normal.mean();
        loop {
            let sample = self.normal.sample(rng);
            if (sample - mean).abs() <= self.max_deviation {
                break sample;
            }
        }
    }
}

impl ClippedNormal {

    /** None when the deviations are not positive and finite. */
    pub fn new(mean: f64, standard_deviation: f64, max_deviation: f64) -> Option<Self> {
        if !(max_deviation > 0.0) {
            return None;
        }
        rand_distr::Normal::new(mean, standard_deviation).ok()
            .filter(|_| standard_deviation > 0.0)
            .map(|normal| Self { normal, max_deviation })
    }

}

/** Coefficients uniform in {-1, 0, 1}. */
pub fn ternary<R: Rng + ?Sized>(rng: &mut R, coeff_count: usize) -> Vec<i64> {
    let distribution = Uniform::new_inclusive(-1i64, 1);
    (0..coeff_count).map(|_| distribution.sample(rng)).collect()
}

/** Rounded samples of `distribution`. */
pub fn rounded<R: Rng + ?Sized>(rng: &mut R, distribution: &ClippedNormal, coeff_count: usize) -> Vec<i64> {
    (0..coeff_count).map(|_| distribution.sample(rng).round() as i64).collect()
}

/** Fills `destination` with one uniform residue polynomial per modulus. */
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, moduli: &[Modulus], coeff_count: usize, destination: &mut [u64]) {
    for (modulus, chunk) in moduli.iter().zip(destination.chunks_exact_mut(coeff_count)) {
        let distribution = Uniform::new(0, modulus.value());
        chunk.iter_mut().for_each(|x| *x = distribution.sample(rng));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_ternary() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let sampled = ternary(&mut rng, 1000);
        assert!(sampled.iter().all(|x| (-1..=1).contains(x)));
        assert!(sampled.iter().any(|&x| x == -1));
        assert!(sampled.iter().any(|&x| x == 1));
    }

    #[test]
    fn test_clipped_normal() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let distribution = ClippedNormal::new(0.0, 3.2, 3.2 * NOISE_DISTRIBUTION_WITH_MULTIPLIER).unwrap();
        let sampled = rounded(&mut rng, &distribution, 10000);
        assert!(sampled.iter().all(|x| x.abs() <= 20));
        let mean = sampled.iter().sum::<i64>() as f64 / sampled.len() as f64;
        assert!(mean.abs() < 0.5);
        assert!(ClippedNormal::new(0.0, -1.0, 1.0).is_none());
        assert!(ClippedNormal::new(0.0, 1.0, 0.0).is_none());
    }

    #[test]
    fn test_uniform() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let moduli = [Modulus::new(17), Modulus::new(97)];
        let mut destination = vec![0; 2 * 64];
        uniform(&mut rng, &moduli, 64, &mut destination);
        assert!(destination[..64].iter().all(|&x| x < 17));
        assert!(destination[64..].iter().all(|&x| x < 97));
    }
}
