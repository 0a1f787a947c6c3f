//! Test doubles shared by the unit tests

use crate::config::{PdcpCustomTxConfig, PdcpMaxCount, PdcpRxConfig, PdcpTimer, PdcpTxConfig, RlcMode, SnSize};
use crate::entity_rx::PdcpEntityRx;
use crate::entity_tx::PdcpEntityTx;
use crate::security::{
    CipheringAlgorithm, IntegrityAlgorithm, SecKey, SecMac, SecurityConfig, SecurityDirection, SecurityPrimitives,
};
use bytes::Bytes;
use common::types::RbId;
use interfaces::{ControlChannel, ControlNotification, LowerLayerChannel, LowerLayerMessage, PdcpSide, StatusReportChannel, UpperDataChannel};
use tokio::sync::mpsc::UnboundedReceiver;

/// FNV-1a over all inputs; any single byte change alters the MAC
pub fn toy_nia(key: &SecKey, count: u32, bearer_id: u8, direction: SecurityDirection, msg: &[u8]) -> SecMac {
    let mut hash: u32 = 0x811c_9dc5;
    let prefix = key
        .iter()
        .copied()
        .chain(count.to_be_bytes())
        .chain([bearer_id, direction as u8]);
    for byte in prefix.chain(msg.iter().copied()) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash.to_be_bytes()
}

/// XOR keystream cipher; applying it twice restores the input
pub fn toy_nea(key: &SecKey, count: u32, bearer_id: u8, direction: SecurityDirection, data: &mut [u8]) {
    let count_bytes = count.to_be_bytes();
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 16] ^ count_bytes[i % 4] ^ bearer_id ^ (direction as u8) ^ (i as u8);
    }
}

pub fn test_primitives() -> SecurityPrimitives {
    SecurityPrimitives {
        nia1: Some(toy_nia),
        nia2: Some(toy_nia),
        nia3: Some(toy_nia),
        nea1: Some(toy_nea),
        nea2: Some(toy_nea),
        nea3: Some(toy_nea),
    }
}

pub fn nia2_nea2() -> SecurityConfig {
    SecurityConfig {
        integ_algo: Some(IntegrityAlgorithm::Nia2),
        cipher_algo: CipheringAlgorithm::Nea2,
        k_int: Some([0x5a; 16]),
        k_enc: [0xa5; 16],
    }
}

pub fn tx_config(rlc_mode: RlcMode, sn_size: SnSize, discard_timer: Option<PdcpTimer>) -> PdcpTxConfig {
    PdcpTxConfig {
        rlc_mode,
        sn_size,
        direction: SecurityDirection::Downlink,
        discard_timer,
        status_report_required: true,
        max_count: PdcpMaxCount::default(),
        custom: PdcpCustomTxConfig::default(),
    }
}

pub fn rx_config(rlc_mode: RlcMode, sn_size: SnSize, t_reordering: PdcpTimer) -> PdcpRxConfig {
    PdcpRxConfig {
        rlc_mode,
        sn_size,
        direction: SecurityDirection::Downlink,
        t_reordering,
        max_count: PdcpMaxCount::default(),
        escalate_integrity_failure: false,
    }
}

pub struct TxHarness {
    pub entity: PdcpEntityTx,
    pub lower_rx: UnboundedReceiver<LowerLayerMessage>,
    pub control_rx: UnboundedReceiver<ControlNotification>,
}

impl TxHarness {
    /// Protected PDUs handed to the lower layer so far
    pub fn pdus(&mut self) -> Vec<(Bytes, bool)> {
        drain(&mut self.lower_rx)
            .into_iter()
            .filter_map(|msg| match msg {
                LowerLayerMessage::NewPdu { pdu, is_retx } => Some((pdu, is_retx)),
                LowerLayerMessage::DiscardPdu { .. } => None,
            })
            .collect()
    }
}

pub fn tx_entity(rb_id: RbId, cfg: PdcpTxConfig) -> TxHarness {
    let (lower, lower_rx) = LowerLayerChannel::new();
    let (control, control_rx) = ControlChannel::new(rb_id, PdcpSide::Tx);
    let entity = PdcpEntityTx::new(0, rb_id, cfg, test_primitives(), Box::new(lower), Box::new(control))
        .expect("valid TX config");
    TxHarness {
        entity,
        lower_rx,
        control_rx,
    }
}

pub struct RxHarness {
    pub entity: PdcpEntityRx,
    pub sdu_rx: UnboundedReceiver<Bytes>,
    pub control_rx: UnboundedReceiver<ControlNotification>,
    pub status_rx: UnboundedReceiver<Bytes>,
}

pub fn rx_entity(rb_id: RbId, cfg: PdcpRxConfig) -> RxHarness {
    let (upper_dn, sdu_rx) = UpperDataChannel::new();
    let (control, control_rx) = ControlChannel::new(rb_id, PdcpSide::Rx);
    let (status, status_rx) = StatusReportChannel::new();
    let entity = PdcpEntityRx::new(
        0,
        rb_id,
        cfg,
        test_primitives(),
        Box::new(upper_dn),
        Box::new(control),
        Box::new(status),
    )
    .expect("valid RX config");
    RxHarness {
        entity,
        sdu_rx,
        control_rx,
        status_rx,
    }
}

/// Everything currently queued on a channel
pub fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}
