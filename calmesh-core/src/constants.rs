/// History fetched on a user's first-ever sync (no event mappings yet).
pub const INITIAL_LOOKBACK_DAYS: i64 = 365;

/// History fetched on later syncs.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Forward window; fixed across runs.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 180;

pub const PRODID: &str = "-//calmesh//calmesh sync//EN";

pub const DEFAULT_EVENT_TITLE: &str = "Untitled Event";
