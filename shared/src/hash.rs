//! State hashing for desync detection
//!
//! Peers compare one `u64` per tick. The simulation state is split into
//! independent shards (one per entity, chunk, ...); every shard is hashed on
//! its own with SHA-256, truncated to 64 bits, and the partial hashes are
//! summed with wrapping addition. Addition is commutative and associative, so
//! the final value does not depend on shard order or on how rayon splits the
//! work across threads.

use rayon::prelude::*;
use sha2::{Digest, Sha256};

/// Domain separator for per-shard digests.
const SHARD_DOMAIN: &[u8] = b"LOCKSTEP_SHARD_V1";

/// Domain separator for the session-wide header digest.
const HEADER_DOMAIN: &[u8] = b"LOCKSTEP_HEADER_V1";

/// Incremental SHA-256 hasher with helpers for fixed-width integers.
///
/// All integers are fed big-endian. Order of updates matters.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_be_bytes());
    }

    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_be_bytes());
    }

    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_be_bytes());
    }

    /// First eight bytes of the digest.
    pub fn finish_u64(self) -> u64 {
        let digest = self.hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }
}

/// One independently hashable piece of simulation state.
pub trait StateShard: Sync {
    /// Stable key that distinguishes this shard from its siblings.
    fn shard_key(&self) -> u64;

    fn hash_into(&self, hasher: &mut StateHasher);
}

/// Commutative, associative combiner for partial hashes. Identity is 0.
#[inline]
pub fn combine(a: u64, b: u64) -> u64 {
    a.wrapping_add(b)
}

/// Hash of a single shard, keyed so equal contents under different keys
/// produce different values.
pub fn shard_hash<S: StateShard>(shard: &S) -> u64 {
    let mut hasher = StateHasher::new(SHARD_DOMAIN);
    hasher.update_u64(shard.shard_key());
    shard.hash_into(&mut hasher);
    hasher.finish_u64()
}

/// Hashes all shards in parallel and reduces them with [`combine`].
pub fn parallel_shard_hash<S: StateShard>(shards: &[S]) -> u64 {
    shards.par_iter().map(shard_hash).reduce(|| 0, combine)
}

/// Same value as [`parallel_shard_hash`], computed on the calling thread.
pub fn sequential_shard_hash<S: StateShard>(shards: &[S]) -> u64 {
    shards.iter().map(shard_hash).fold(0, combine)
}

/// Hash of the simulation-wide scalars (tick counter, seed, ...).
///
/// Combined with the shard hash so two states that differ only in these
/// scalars still disagree.
pub fn header_hash(tick: u32, seed: u64) -> u64 {
    let mut hasher = StateHasher::new(HEADER_DOMAIN);
    hasher.update_u32(tick);
    hasher.update_u64(seed);
    hasher.finish_u64()
}
