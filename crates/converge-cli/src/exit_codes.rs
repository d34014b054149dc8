//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Input error - unreadable manifests or malformed labels
pub const INPUT_ERROR: i32 = 2;

/// Configuration error - invalid reconciler configuration
pub const CONFIG_ERROR: i32 = 3;

/// Cluster error - API unreachable or a resource operation failed
pub const CLUSTER_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Interrupted by Ctrl-C (128 + SIGINT)
pub const INTERRUPTED: i32 = 130;
