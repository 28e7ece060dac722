/// Interval between two liveness probe rounds, in seconds
pub const PING_INTERVAL_SECS: u64 = 10;

/// Consecutive failed probes tolerated before a channel is evicted
pub const LIVENESS_THRESHOLD: u32 = 10;

/// Deadline for store calls and outbound deliveries, in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Capacity of the per-channel outbound frame queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default page size of a history query
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// Largest page a history query may request
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Maximum accepted inbound frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
