use sha2::Digest;

const HASH_BLOCK_U64_COUNT: usize = 4;

pub type HashBlock = [u64; HASH_BLOCK_U64_COUNT];

pub const HASH_ZERO_BLOCK: HashBlock = [0; HASH_BLOCK_U64_COUNT];

/** SHA-256 of the little-endian encoding of `input`, as four words. */
pub fn hash(input: &[u64]) -> HashBlock {
    let mut hasher = sha2::Sha256::new();
    for value in input {
        hasher.update(value.to_le_bytes());
    }
    let out = hasher.finalize();
    let mut destination = HASH_ZERO_BLOCK;
    for (d, chunk) in destination.iter_mut().zip(out.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *d = u64::from_le_bytes(word);
    }
    destination
}
