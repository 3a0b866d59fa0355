use std::collections::HashMap;

/// Position on the identifier circle, always below 2^ring_bits.
pub type Id = u64;

/// Backing map shared by the primary and replica shards.
pub type KvMap = HashMap<String, String>;
