//! PDCP Metrics
//!
//! Counters kept by each entity. Snapshots are plain serializable values.

use serde::Serialize;

/// TX entity counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PdcpTxMetrics {
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_dropped_sdus: u64,
    pub num_discard_timeouts: u64,
}

impl PdcpTxMetrics {
    pub(crate) fn add_sdu(&mut self, len: usize) {
        self.num_sdus += 1;
        self.num_sdu_bytes += len as u64;
    }

    pub(crate) fn add_pdu(&mut self, len: usize) {
        self.num_pdus += 1;
        self.num_pdu_bytes += len as u64;
    }
}

/// RX entity counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PdcpRxMetrics {
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_dropped_pdus: u64,
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    pub num_integrity_verified_pdus: u64,
    pub num_integrity_failed_pdus: u64,
    pub num_t_reordering_timeouts: u64,
}

impl PdcpRxMetrics {
    pub(crate) fn add_pdu(&mut self, len: usize) {
        self.num_pdus += 1;
        self.num_pdu_bytes += len as u64;
    }

    pub(crate) fn add_sdu(&mut self, len: usize) {
        self.num_sdus += 1;
        self.num_sdu_bytes += len as u64;
    }
}

/// Metrics of a bearer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PdcpMetrics {
    pub tx: PdcpTxMetrics,
    pub rx: PdcpRxMetrics,
}
