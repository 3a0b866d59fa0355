pub static STABILIZE_SLEEP_MILLIS: u64 = 5_000;
pub static FIX_FINGERS_SLEEP_MILLIS: u64 = 5_000;
pub static CHECK_PREDECESSOR_SLEEP_MILLIS: u64 = 5_000;

pub static RPC_TIMEOUT_MILLIS: u64 = 2_000;
pub static REPLY_WAIT_MILLIS: u64 = 500;
pub static PING_TIMEOUT_MILLIS: u64 = 1_000;
pub static LIVENESS_TIMEOUT_MILLIS: u64 = 15_000;

pub static DEFAULT_RING_BITS: u32 = 8;
pub static DEFAULT_SUCCESSOR_COUNT: usize = 3;
pub static MAX_DATAGRAM_BYTES: usize = 1024;

/// Sentinel value returned by LOOKUP when neither shard holds the key.
pub static NOT_FOUND: &str = "NOT_FOUND";
