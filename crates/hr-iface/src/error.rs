use thiserror::Error;

use crate::types::Family;

/// Failure reported by a platform adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("no platform resources left for {0}")]
    Exhausted(String),

    #[error("{op} rejected on {ifname}: {reason}")]
    Rejected {
        op: &'static str,
        ifname: String,
        reason: String,
    },

    #[error("platform worker is gone")]
    WorkerGone,
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum IfaceError {
    #[error("Interface not found: {0}")]
    NotFound(String),

    #[error("No open {family} transaction on {ifname}")]
    NoTransaction { ifname: String, family: Family },

    #[error("{item} does not belong in the {family} uplink of {ifname}")]
    FamilyMismatch {
        ifname: String,
        family: Family,
        item: String,
    },

    #[error("Cannot allocate platform handle for {ifname}: {source}")]
    Allocation {
        ifname: String,
        #[source]
        source: PlatformError,
    },

    #[error("Prefix store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("Prefix store format error: {0}")]
    StoreFormat(#[from] serde_json::Error),
}

pub type IfaceResult<T> = Result<T, IfaceError>;
