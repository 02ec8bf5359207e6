//! Survivable virtual cluster admission on a hierarchical data center network.
//!
//! Tenants ask for `N` compute units with a hose-model bandwidth guarantee `B` per unit.
//! The [`brain::Brain`] places the primaries, protects them against any single host
//! failure with collocation-aware backups, and lets tenants with disjoint failure
//! scenarios share backup bandwidth on a link.

use thiserror::Error;

use crate::bandwidth::Bandwidth;
use crate::cluster::LinkIx;

pub mod bandwidth;

pub mod architecture;
pub mod cluster;
pub mod ledger;
pub mod subtree;

pub mod request;

pub mod backup;
pub mod mapping;
pub mod primary;
pub mod sharing;

pub mod oracle;

pub mod brain;
pub use brain::{Brain, BrainSetting};

pub mod stats;

pub type RequestId = usize;

// simulated time, in milliseconds
pub type Timestamp = u64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),
    #[error("duplicate request: {0}")]
    DuplicateRequest(RequestId),
    #[error("insufficient bandwidth on link {link:?}, requested: {requested}, residual: {residual}")]
    InsufficientBandwidth {
        link: LinkIx,
        requested: Bandwidth,
        residual: Bandwidth,
    },
    #[error("ledger invariant violated: {0}")]
    Invariant(String),
}
