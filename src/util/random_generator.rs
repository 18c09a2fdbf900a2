use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::util::basic::HE_PRNG_SEED_BYTES;

/** Seed of a [BlakeRNG]. */
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PRNGSeed(pub [u8; HE_PRNG_SEED_BYTES]);

impl Default for PRNGSeed {
    fn default() -> Self {
        PRNGSeed([0; HE_PRNG_SEED_BYTES])
    }
}

impl AsMut<[u8]> for PRNGSeed {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for PRNGSeed {
    fn as_ref(&self) -> &[u8] {&self.0}
}

const BUFFER_SIZE: usize = 4096;

/**
Deterministic generator expanding a seed with the BLAKE3 extendable output function.
Block `k` of the stream is XOF(seed || k), so two generators built from the same
seed produce the same stream.
*/
pub struct BlakeRNG {
    buffer: Box<[u8; BUFFER_SIZE]>,
    seed: PRNGSeed,
    counter: u64,
    buffer_current: usize,
}

impl SeedableRng for BlakeRNG {
    type Seed = PRNGSeed;

    fn from_seed(seed: Self::Seed) -> Self {
        Self {
            seed,
            counter: 0,
            buffer: Box::new([0; BUFFER_SIZE]),
            buffer_current: BUFFER_SIZE,
        }
    }
}

impl BlakeRNG {

    /** A generator whose seed is drawn from a ChaCha20 stream seeded with system entropy. */
    pub fn new_random() -> Self {
        let mut seed = PRNGSeed::default();
        ChaCha20Rng::from_entropy().fill_bytes(seed.as_mut());
        Self::from_seed(seed)
    }

    pub fn seed(&self) -> &PRNGSeed {&self.seed}

    fn refill_buffer(&mut self) {
        let mut hash = blake3::Hasher::new();
        hash.update(self.seed.as_ref());
        hash.update(&self.counter.to_le_bytes());
        hash.finalize_xof().fill(self.buffer.as_mut());
        self.buffer_current = 0;
        self.counter = self.counter.wrapping_add(1);
    }

    fn take<const K: usize>(&mut self) -> [u8; K] {
        if self.buffer_current + K > BUFFER_SIZE {
            self.refill_buffer();
        }
        let mut out = [0u8; K];
        out.copy_from_slice(&self.buffer[self.buffer_current..self.buffer_current + K]);
        self.buffer_current += K;
        out
    }

}

impl RngCore for BlakeRNG {

    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take::<4>())
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take::<8>())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut i = 0;
        while i < dest.len() {
            if self.buffer_current >= BUFFER_SIZE {
                self.refill_buffer();
            }
            let len = std::cmp::min(dest.len() - i, BUFFER_SIZE - self.buffer_current);
            dest[i..i + len].copy_from_slice(&self.buffer[self.buffer_current..self.buffer_current + len]);
            i += len;
            self.buffer_current += len;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }

}
