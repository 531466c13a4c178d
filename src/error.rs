use std::time::Duration;

use thiserror::Error;

use crate::doorman::Role;

/// Rejected [`ExpiryStrategy`](crate::ExpiryStrategy) configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The time-out was zero.
    #[error("time-out must be non-zero")]
    ZeroTimeOut,

    /// The precision was zero.
    #[error("precision must be non-zero")]
    ZeroPrecision,

    /// The tick interval cannot be coarser than the entry lifetime.
    #[error("precision ({precision:?}) exceeds time-out ({time_out:?})")]
    PrecisionExceedsTimeOut {
        time_out: Duration,
        precision: Duration,
    },
}

/// A caller sat in a doorman's admission queue longer than the configured
/// maximum and was removed without being admitted.
///
/// The caller was *not* granted access; whether to retry is its decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("timed out after {max_queue_wait:?} waiting for {role} access to \"{area}\"")]
pub struct QueueTimeout {
    /// Name of the protected area the caller was waiting to enter.
    pub area: String,
    /// The role the caller was waiting for.
    pub role: Role,
    /// The configured maximum queue wait that elapsed.
    pub max_queue_wait: Duration,
}

/// Rejected [`ExpiryFolder::copy_into`](crate::ExpiryFolder::copy_into) call.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Source and target are the same folder instance.
    #[error("a folder cannot be copied into itself")]
    SameFolder,

    /// The two folders' strategies disagree on precision, so their
    /// generations age at different rates.
    #[error("source precision ({source_precision:?}) differs from target precision ({target_precision:?})")]
    PrecisionMismatch {
        source_precision: Duration,
        target_precision: Duration,
    },

    /// One of the folders' internal locks could not be acquired in time.
    #[error(transparent)]
    Timeout(#[from] QueueTimeout),
}
