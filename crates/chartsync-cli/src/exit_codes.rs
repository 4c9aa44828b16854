//! Standard exit codes for CLI operations
//!
//! Partial success counts as success: only a failed addon makes a sync
//! exit non-zero.

/// Success - every addon synced, possibly with warnings or partial results
pub const SUCCESS: i32 = 0;

/// At least one addon failed
pub const SYNC_FAILED: i32 = 1;

/// Configuration or usage error
pub const USAGE_ERROR: i32 = 2;

/// Fatal before any addon started (missing tools, no cloud identity)
pub const PRE_RUN_ERROR: i32 = 3;

/// Input discovery error - unreadable input or no addons found
pub const DISCOVERY_ERROR: i32 = 4;

/// Interrupted by Ctrl-C (128 + SIGINT)
pub const INTERRUPTED: i32 = 130;
