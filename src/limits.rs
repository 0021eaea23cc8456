/// Longest opaque member identifier accepted by the ledger.
pub const MAX_MEMBER_ID_LEN: usize = 64;

/// One reservation per minute of the day is the most a facility can hold.
pub const MAX_RESERVATIONS_PER_DAY: usize = 1440;

/// Bound on the WAL writer's command queue.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
