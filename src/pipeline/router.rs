const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic symbol → shard mapping
///
/// All ticks for one symbol land on one shard, which is what gives per-symbol
/// ordering without any cross-shard coordination. The hash is FNV-1a over the
/// symbol bytes, so the mapping is identical across processes and restarts
/// (unlike `std`'s randomly seeded hasher).
#[derive(Debug, Clone, Copy)]
pub struct Router {
    shard_count: usize,
}

impl Router {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "Must have at least one shard");
        Self { shard_count }
    }

    /// Shard index in `[0, shard_count)` for a non-empty symbol
    #[inline]
    pub fn shard_for(&self, symbol: &str) -> usize {
        shard_for(symbol, self.shard_count)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

/// Stable hash-modulo routing; callers reject empty symbols beforehand
#[inline]
pub fn shard_for(symbol: &str, shard_count: usize) -> usize {
    let hash = fnv1a(symbol.as_bytes());
    // FNV low bits only depend on the low bits of each input byte; fold the
    // well-mixed high half in before taking the modulo
    ((hash ^ (hash >> 32)) % shard_count as u64) as usize
}

#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(FNV_PRIME)
    })
}
