//! Explicit limits and defaults for Roster
//!
//! All limits use big-endian naming (most significant first) and carry their
//! unit in the name.

// =============================================================================
// Lease Defaults
// =============================================================================

/// Default heartbeat renewal interval in seconds
pub const LEASE_RENEWAL_INTERVAL_SECONDS_DEFAULT: i32 = 30;

/// Default number of missed renewals tolerated before expiry
pub const LEASE_RETRY_TIMES_DEFAULT: i32 = 3;

/// Effective TTL computed from the defaults: interval * (times + 1)
pub const LEASE_TTL_SECONDS_DEFAULT: i64 = (LEASE_RENEWAL_INTERVAL_SECONDS_DEFAULT
    * (LEASE_RETRY_TIMES_DEFAULT + 1)) as i64;

/// Exclusive upper bound on a computed instance TTL in seconds
pub const LEASE_TTL_SECONDS_MAX: i64 = i32::MAX as i64;

// =============================================================================
// Instance Limits
// =============================================================================

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 64;

/// Maximum number of endpoints per instance
pub const INSTANCE_ENDPOINTS_COUNT_MAX: usize = 64;

/// Maximum number of client-opaque properties per instance
pub const INSTANCE_PROPERTIES_COUNT_MAX: usize = 100;

// =============================================================================
// Heartbeat Limits
// =============================================================================

/// Maximum number of elements in one batch heartbeat request
pub const HEARTBEAT_SET_ELEMENTS_COUNT_MAX: usize = 500;

/// Default concurrency bound for batch heartbeat fanout
pub const HEARTBEAT_SET_CONCURRENCY_DEFAULT: usize = 200;

// =============================================================================
// Eviction / Cache
// =============================================================================

/// Interval between lease-expiry sweeps in milliseconds
pub const LEASE_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Capacity of the KV watch event channel
pub const WATCH_CHANNEL_CAPACITY: usize = 1_024;

// Compile-time assertions for constant validity
const _: () = {
    assert!(LEASE_TTL_SECONDS_DEFAULT == 120);
    assert!(LEASE_TTL_SECONDS_DEFAULT < LEASE_TTL_SECONDS_MAX);
    assert!(HEARTBEAT_SET_CONCURRENCY_DEFAULT > 0);
    assert!(HEARTBEAT_SET_ELEMENTS_COUNT_MAX >= HEARTBEAT_SET_CONCURRENCY_DEFAULT);
    assert!(WATCH_CHANNEL_CAPACITY >= 64);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_is_two_minutes() {
        assert_eq!(LEASE_TTL_SECONDS_DEFAULT, 120);
    }
}
