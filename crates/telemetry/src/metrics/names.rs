//! Metric names recorded by Tollgate

/// Admission decisions, with an `outcome` attribute
pub const RATE_LIMIT_DECISIONS: &str = "ratelimit.decisions";

/// Duration of one counter store round trip in milliseconds, with a `status` attribute
pub const RATE_LIMIT_STORE_DURATION: &str = "ratelimit.store.duration";
