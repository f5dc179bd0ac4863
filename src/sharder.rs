//! Sharder implementation.
//!
//! Bucketing hashes `bucketing_id + entity_id` with MurmurHash3 (x86, 32-bit) and maps the hash
//! into `[0, MAX_TRAFFIC_VALUE)`. Every SDK bucketing against the same datafile must produce the
//! same bucket value for the same input, so the hash must stay bit-exact.

/// Seed shared by all implementations of the bucketing protocol.
pub const HASH_SEED: u32 = 1;

/// Size of the bucket space. Traffic allocation ranges are expressed in these units (basis
/// points).
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

pub trait Sharder {
    /// Map `input` into `[0, total_shards)`.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32;
}

/// The default (and only production) sharder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Sharder;

impl Sharder for Murmur3Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32 {
        bucket_value(murmur3_32(input.as_ref(), HASH_SEED), total_shards)
    }
}

/// Scale a 32-bit hash into `[0, total_shards)`.
///
/// The hash is treated as a fraction of 2^32, multiplied by `total_shards`, and floored.
pub fn bucket_value(hash: u32, total_shards: u32) -> u32 {
    let ratio = f64::from(hash) / 4_294_967_296.0;
    let value = (ratio * f64::from(total_shards)).floor() as u32;
    value.min(total_shards.saturating_sub(1))
}

/// MurmurHash3 x86_32.
pub fn murmur3_32(input: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;

    let mut blocks = input.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, byte)| acc | u32::from(*byte) << (8 * i));
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    // Length is mixed in modulo 2^32, same as the reference implementation.
    h ^= input.len() as u32;
    fmix32(h)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Sharder returning pre-configured bucket values. Unknown inputs land in bucket 0.
#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<Vec<u8>, u32>);

#[cfg(test)]
impl DeterministicSharder {
    pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        DeterministicSharder(
            values
                .into_iter()
                .map(|(input, value)| (input.as_bytes().to_vec(), value))
                .collect(),
        )
    }
}

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32 {
        self.0.get(input.as_ref()).copied().unwrap_or(0) % total_shards
    }
}
