//! Centralized entropy conditioning.
//!
//! **ALL** whitening lives here — the extractor hands over raw noise and this
//! module is the single, auditable gateway that turns it into uniform blocks.
//!
//! ```text
//! RawNoise → chunk → whiten (BLAKE3/SHA-256/BLAKE3) → timestamp+nonce mix
//!          → chain with previous block → BLAKE3-XOF expand → Block payload
//! ```
//!
//! The chain stops replay of identical chunks across calls; the timestamp and
//! nonce stop identical chunks within one call; alternating hash families
//! hedge against a defect in either primitive.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Raw chunks below this Shannon entropy (bits/byte) are dropped instead of
/// whitened. Hashing would dress a degenerate chunk up as perfect randomness;
/// the same 1.0 floor that marks an upstream source unhealthy applies here.
pub const RAW_SHANNON_FLOOR: f64 = 1.0;

/// Domain separation for the short-input derivation path.
const DERIVE_CONTEXT: &str = "heliorand v1 short-noise block expand";

/// Error from conditioning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// The raw noise buffer was zero-length.
    #[error("raw noise buffer is empty")]
    EmptyInput,
}

/// Chunk-to-block conditioner with a persistent chaining value.
///
/// One instance is one chain: concurrent access to a single instance is not
/// supported, but independent instances (each with their own chain) may run
/// in parallel.
pub struct Conditioner {
    block_size: usize,
    chain: [u8; 32],
    nonce: u64,
    clock: fn() -> u64,
}

impl Conditioner {
    /// Conditioner producing `block_size`-byte blocks on the system clock.
    pub fn new(block_size: usize) -> Self {
        Self::with_clock(block_size, epoch_micros)
    }

    /// Conditioner with an injected microsecond clock, for deterministic
    /// derivations.
    pub fn with_clock(block_size: usize, clock: fn() -> u64) -> Self {
        Self {
            block_size,
            chain: [0u8; 32],
            nonce: 0,
            clock,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Zero the chaining value and nonce, starting a fresh chain.
    pub fn reset(&mut self) {
        self.chain = [0u8; 32];
        self.nonce = 0;
    }

    /// Condition a raw noise buffer into fixed-size blocks.
    ///
    /// The buffer is split into `max(block_size, 1024)`-byte chunks (trailing
    /// remainder discarded). Each chunk is whitened, mixed with the clock and
    /// nonce, chained to its predecessor, and expanded to exactly
    /// `block_size` bytes. Degenerate chunks (see [`RAW_SHANNON_FLOOR`]) are
    /// skipped. A buffer shorter than one chunk yields a single block through
    /// the keyed derivation path.
    pub fn process(&mut self, raw: &[u8]) -> Result<Vec<Vec<u8>>, ConditionError> {
        if raw.is_empty() {
            return Err(ConditionError::EmptyInput);
        }

        let chunk_size = self.block_size.max(1024);
        let num_chunks = raw.len() / chunk_size;

        if num_chunks == 0 {
            if quick_shannon(raw) < RAW_SHANNON_FLOOR {
                return Ok(Vec::new());
            }
            let whitened = multi_round_hash(raw, 3);
            return Ok(vec![derive_block(&whitened, self.block_size)]);
        }

        let mut blocks = Vec::with_capacity(num_chunks);
        for chunk in raw.chunks_exact(chunk_size) {
            if quick_shannon(chunk) < RAW_SHANNON_FLOOR {
                continue;
            }

            let whitened = multi_round_hash(chunk, 3);
            let timestamped = self.mix_timestamp(&whitened);
            let chained = self.advance_chain(&timestamped);
            blocks.push(expand(&chained, self.block_size));
        }

        log::debug!(
            "conditioned {} bytes into {} block(s) of {}",
            raw.len(),
            blocks.len(),
            self.block_size
        );
        Ok(blocks)
    }

    /// BLAKE3(digest ‖ epoch-micros ‖ nonce), big-endian integers.
    ///
    /// The nonce keeps outputs distinct even when the platform clock is too
    /// coarse to tick between chunks.
    fn mix_timestamp(&mut self, digest: &[u8; 32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(digest);
        hasher.update(&(self.clock)().to_be_bytes());
        hasher.update(&self.nonce.to_be_bytes());
        self.nonce += 1;
        *hasher.finalize().as_bytes()
    }

    /// BLAKE3(previous chain ‖ digest); the result becomes the new chain.
    fn advance_chain(&mut self, digest: &[u8; 32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.chain);
        hasher.update(digest);
        let out = *hasher.finalize().as_bytes();
        self.chain = out;
        out
    }
}

// ---------------------------------------------------------------------------
// Hash primitives
// ---------------------------------------------------------------------------

/// Alternating hash rounds: BLAKE3 on even rounds, SHA-256 on odd rounds.
pub fn multi_round_hash(data: &[u8], rounds: usize) -> [u8; 32] {
    let mut state: Vec<u8> = data.to_vec();
    let mut digest = [0u8; 32];
    for round in 0..rounds {
        digest = if round % 2 == 0 {
            *blake3::hash(&state).as_bytes()
        } else {
            let out: [u8; 32] = Sha256::digest(&state).into();
            out
        };
        state = digest.to_vec();
    }
    digest
}

/// Expand a 32-byte digest to `len` bytes with BLAKE3's extensible output.
pub fn expand(digest: &[u8; 32], len: usize) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(digest);
    let mut out = vec![0u8; len];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Keyed, arbitrary-length derivation for the short-input path.
fn derive_block(digest: &[u8; 32], len: usize) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new_derive_key(DERIVE_CONTEXT);
    hasher.update(digest);
    let mut out = vec![0u8; len];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Stretch or truncate arbitrary bytes to `len` via BLAKE3 XOF.
fn stretch(data: &[u8], len: usize) -> Vec<u8> {
    if data.len() >= len {
        return data[..len].to_vec();
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    let mut out = vec![0u8; len];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Mix byte buffers from independent sources into one 32-byte digest.
///
/// Every buffer is stretched to the longest length, the buffers are
/// XOR-folded together, and the fold is hashed. A single buffer degenerates
/// to its plain hash.
pub fn mix_sources(sources: &[Vec<u8>]) -> Vec<u8> {
    match sources {
        [] => Vec::new(),
        [one] => blake3::hash(one).as_bytes().to_vec(),
        many => {
            let max_len = many.iter().map(Vec::len).max().unwrap_or(0);
            let mut fold = stretch(&many[0], max_len);
            for buf in &many[1..] {
                let padded = stretch(buf, max_len);
                for (dst, src) in fold.iter_mut().zip(&padded) {
                    *dst ^= src;
                }
            }
            blake3::hash(&fold).as_bytes().to_vec()
        }
    }
}

// ---------------------------------------------------------------------------
// Quick analysis
// ---------------------------------------------------------------------------

/// Shannon entropy in bits/byte of a byte slice.
pub fn quick_shannon(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let n = data.len() as f64;
    let mut h = 0.0;
    for &c in &counts {
        if c > 0 {
            let p = c as f64 / n;
            h -= p * p.log2();
        }
    }
    h
}

fn epoch_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_clock() -> u64 {
        1_700_000_000_000_000
    }

    fn other_clock() -> u64 {
        1_700_000_001_000_000
    }

    fn varied(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn produces_exact_block_sizes_and_count() {
        let mut c = Conditioner::new(4096);
        let blocks = c.process(&varied(3 * 4096)).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == 4096));
    }

    #[test]
    fn trailing_remainder_is_discarded() {
        let mut c = Conditioner::new(4096);
        let blocks = c.process(&varied(2 * 4096 + 1000)).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn empty_input_is_an_error() {
        let mut c = Conditioner::new(4096);
        assert_eq!(c.process(&[]), Err(ConditionError::EmptyInput));
    }

    #[test]
    fn short_input_yields_one_block() {
        let mut c = Conditioner::new(4096);
        let blocks = c.process(&varied(100)).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 4096);
    }

    #[test]
    fn chunk_size_floor_is_1024() {
        // block_size 256 still chunks at 1024, so 2048 bytes yield 2 blocks.
        let mut c = Conditioner::new(256);
        let blocks = c.process(&varied(2048)).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 256));
    }

    #[test]
    fn degenerate_chunks_are_skipped() {
        let mut c = Conditioner::new(4096);
        assert!(c.process(&vec![0u8; 8 * 4096]).unwrap().is_empty());
        assert!(c.process(&vec![0xAB; 4096]).unwrap().is_empty());
    }

    #[test]
    fn same_chain_same_clock_is_deterministic() {
        let raw = varied(4 * 4096);
        let mut a = Conditioner::with_clock(4096, fixed_clock);
        let mut b = Conditioner::with_clock(4096, fixed_clock);
        assert_eq!(a.process(&raw).unwrap(), b.process(&raw).unwrap());
    }

    #[test]
    fn runs_at_different_times_diverge() {
        let raw = varied(4 * 4096);
        let mut a = Conditioner::with_clock(4096, fixed_clock);
        let mut b = Conditioner::with_clock(4096, other_clock);
        let blocks_a = a.process(&raw).unwrap();
        let blocks_b = b.process(&raw).unwrap();
        for (x, y) in blocks_a.iter().zip(&blocks_b) {
            assert_ne!(x, y);
        }
    }

    #[test]
    fn identical_chunks_produce_distinct_blocks() {
        // Same content, same pinned clock: the nonce still separates them.
        let chunk: Vec<u8> = varied(4096);
        let mut raw = chunk.clone();
        raw.extend_from_slice(&chunk);
        let mut c = Conditioner::with_clock(4096, fixed_clock);
        let blocks = c.process(&raw).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_ne!(blocks[0], blocks[1]);
    }

    #[test]
    fn reset_restarts_the_chain() {
        let raw = varied(2 * 4096);
        let mut c = Conditioner::with_clock(4096, fixed_clock);
        let first = c.process(&raw).unwrap();
        c.reset();
        let second = c.process(&raw).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn chain_carries_across_calls() {
        let raw = varied(4096);
        let mut c = Conditioner::with_clock(4096, fixed_clock);
        let first = c.process(&raw).unwrap();
        // Without a reset the chain has advanced, so the same input maps
        // to a different block.
        let second = c.process(&raw).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn mix_sources_single_buffer_is_its_hash() {
        let data = varied(100);
        let mixed = mix_sources(std::slice::from_ref(&data));
        assert_eq!(mixed, blake3::hash(&data).as_bytes().to_vec());
    }

    #[test]
    fn mix_sources_is_order_sensitive_only_through_xor() {
        // XOR folding is commutative, so order must not matter.
        let a = varied(64);
        let b: Vec<u8> = (0..64).map(|i| (i * 7 % 256) as u8).collect();
        assert_eq!(
            mix_sources(&[a.clone(), b.clone()]),
            mix_sources(&[b, a])
        );
    }

    #[test]
    fn mix_sources_empty_is_empty() {
        assert!(mix_sources(&[]).is_empty());
    }

    #[test]
    fn conditioned_output_looks_uniform() {
        let mut c = Conditioner::new(4096);
        let blocks = c.process(&varied(4 * 4096)).unwrap();
        for block in blocks {
            assert!(quick_shannon(&block) > 7.5);
        }
    }

    #[test]
    fn quick_shannon_bounds() {
        assert_eq!(quick_shannon(&[]), 0.0);
        assert_eq!(quick_shannon(&[7u8; 512]), 0.0);
        let full: Vec<u8> = (0..=255).collect();
        assert!((quick_shannon(&full) - 8.0).abs() < 1e-9);
    }
}
