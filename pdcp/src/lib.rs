//! Packet Data Convergence Protocol (PDCP) Layer Implementation
//!
//! Implements the 5G NR PDCP data plane according to 3GPP TS 38.323: COUNT management,
//! integrity protection and ciphering, duplicate detection, reordering, discard timers
//! and status reports.

pub mod config;
pub mod count;
pub mod entity;
pub mod entity_rx;
pub mod entity_tx;
pub mod metrics;
pub mod pdu;
pub mod security;
pub mod task;
pub mod window;

#[cfg(test)]
pub(crate) mod test_helpers;

use thiserror::Error;

pub use config::{PdcpMaxCount, PdcpRxConfig, PdcpTimer, PdcpTxConfig, RlcMode, SnSize};
pub use entity::{PdcpEntity, PdcpEntityConfig, PdcpNotifiers};
pub use entity_rx::{PdcpEntityRx, PdcpRxState};
pub use entity_tx::{PdcpEntityTx, PdcpTxState};
pub use metrics::{PdcpMetrics, PdcpRxMetrics, PdcpTxMetrics};
pub use security::{
    CipheringAlgorithm, IntegrityAlgorithm, SecurityConfig, SecurityDirection, SecurityPrimitives,
};
pub use task::{spawn_bearer_task, PdcpBearerHandle, PdcpCommand};

/// PDCP errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdcpError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("PDU too small: pdu_len={pdu_len} min_len={min_len}")]
    PduTooSmall { pdu_len: usize, min_len: usize },

    #[error("Invalid SN: sn={sn} exceeds sn_size={sn_size}")]
    InvalidSn { sn: u32, sn_size: u32 },

    #[error("Security not configured: {0}")]
    SecurityNotConfigured(&'static str),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid control PDU: {0}")]
    InvalidControlPdu(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bearer task stopped")]
    TaskStopped,
}
