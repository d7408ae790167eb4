//! Gateway error taxonomy.
//!
//! Validation failures (auth, ownership, velocity, quota) are detected before
//! streaming begins and surface as discrete HTTP responses; upstream model
//! failures after the stream has opened are reported inline on the stream
//! instead. Control-block decode failures are deliberately NOT part of this
//! enum: they are logged and swallowed at the decode site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No valid caller identity. Never downgraded to an anonymous caller.
    #[error("Unauthorized access. System locked")]
    AuthenticationRequired,

    /// Workspace missing or owned by someone else. The two causes are
    /// reported identically so existence never leaks across tenants.
    #[error("Workspace not found or unauthorized")]
    TenantIsolation,

    /// Throttle rejection; the caller may retry after `retry_after_ms`.
    #[error("Velocity limit exceeded for {action}. Please slow down.")]
    VelocityExceeded { action: String, retry_after_ms: u64 },

    /// Daily allowance reached; recoverable once `unlock_at_ms` passes.
    #[error("Energy depleted")]
    QuotaExhausted { unlock_at_ms: i64 },

    /// The model call itself failed.
    #[error("Upstream model failure: {0}")]
    UpstreamModel(String),

    /// The storage collaborator failed.
    #[error("Storage failure: {0}")]
    Store(String),
}
