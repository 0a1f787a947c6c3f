//! PDCP Bearer Entity
//!
//! Pairs the TX and RX entities of one radio bearer. Status reports received by the RX
//! entity reach the TX entity over a channel, so the two halves never share state.

use crate::config::{PdcpRxConfig, PdcpTxConfig};
use crate::entity_rx::PdcpEntityRx;
use crate::entity_tx::PdcpEntityTx;
use crate::metrics::PdcpMetrics;
use crate::security::{SecurityConfig, SecurityPrimitives};
use crate::PdcpError;
use bytes::Bytes;
use common::types::RbId;
use interfaces::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxLowerNotifier, PdcpTxUpperControlNotifier,
    StatusReportChannel,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Configuration of both halves of a bearer
#[derive(Debug, Clone)]
pub struct PdcpEntityConfig {
    pub tx: PdcpTxConfig,
    pub rx: PdcpRxConfig,
}

/// Notifiers towards the layers around the bearer
pub struct PdcpNotifiers {
    pub tx_lower: Box<dyn PdcpTxLowerNotifier>,
    pub tx_upper_cn: Box<dyn PdcpTxUpperControlNotifier>,
    pub rx_upper_dn: Box<dyn PdcpRxUpperDataNotifier>,
    pub rx_upper_cn: Box<dyn PdcpRxUpperControlNotifier>,
}

/// PDCP entity of one radio bearer
pub struct PdcpEntity {
    rb_id: RbId,
    tx: PdcpEntityTx,
    rx: PdcpEntityRx,
    status_rx: UnboundedReceiver<Bytes>,
}

impl PdcpEntity {
    pub fn new(
        ue_index: u32,
        rb_id: RbId,
        config: PdcpEntityConfig,
        primitives: SecurityPrimitives,
        notifiers: PdcpNotifiers,
    ) -> Result<Self, PdcpError> {
        let (status_handler, status_rx) = StatusReportChannel::new();
        let tx = PdcpEntityTx::new(
            ue_index,
            rb_id,
            config.tx,
            primitives,
            notifiers.tx_lower,
            notifiers.tx_upper_cn,
        )?;
        let rx = PdcpEntityRx::new(
            ue_index,
            rb_id,
            config.rx,
            primitives,
            notifiers.rx_upper_dn,
            notifiers.rx_upper_cn,
            Box::new(status_handler),
        )?;
        Ok(Self {
            rb_id,
            tx,
            rx,
            status_rx,
        })
    }

    pub fn rb_id(&self) -> RbId {
        self.rb_id
    }

    /// SDU from upper layers
    pub fn handle_sdu(&mut self, sdu: Bytes) {
        self.tx.handle_sdu(sdu);
    }

    /// PDU from the lower layer
    pub fn handle_pdu(&mut self, pdu: Bytes) {
        self.rx.handle_pdu(pdu);
        self.forward_status_reports();
    }

    fn forward_status_reports(&mut self) {
        while let Ok(report) = self.status_rx.try_recv() {
            debug!("Forwarding status report to TX entity. rb={} len={}", self.rb_id, report.len());
            self.tx.handle_status_report(report);
        }
    }

    pub fn handle_transmit_notification(&mut self, notif_sn: u32) {
        self.tx.handle_transmit_notification(notif_sn);
    }

    pub fn handle_delivery_notification(&mut self, notif_sn: u32) {
        self.tx.handle_delivery_notification(notif_sn);
    }

    pub fn handle_retransmit_notification(&mut self, notif_sn: u32) {
        self.tx.handle_retransmit_notification(notif_sn);
    }

    pub fn handle_delivery_retransmitted_notification(&mut self, notif_sn: u32) {
        self.tx.handle_delivery_retransmitted_notification(notif_sn);
    }

    /// Re-establish both entities with a new security configuration
    pub fn reestablish(&mut self, sec_cfg: &SecurityConfig) {
        self.tx.reestablish(sec_cfg);
        self.rx.reestablish(sec_cfg);
    }

    /// Data recovery: status report from the RX state, then retransmission
    pub fn data_recovery(&mut self) {
        self.tx.data_recovery(&self.rx);
    }

    /// Send a status report for the current RX state
    pub fn send_status_report(&mut self) {
        self.tx.send_status_report(&self.rx);
    }

    pub fn configure_security(&mut self, sec_cfg: &SecurityConfig) -> Result<(), PdcpError> {
        self.tx.configure_security(sec_cfg)?;
        self.rx.configure_security(sec_cfg)
    }

    pub fn enable_security(&mut self, integrity: bool, ciphering: bool) -> Result<(), PdcpError> {
        self.tx.enable_security(integrity, ciphering)?;
        self.rx.enable_security(integrity, ciphering)
    }

    /// Advance the timers of both entities
    pub fn tick(&mut self, elapsed: Duration) {
        self.tx.tick(elapsed);
        self.rx.tick(elapsed);
    }

    pub fn tx(&self) -> &PdcpEntityTx {
        &self.tx
    }

    pub fn rx(&self) -> &PdcpEntityRx {
        &self.rx
    }

    /// Snapshot of the metrics of both entities
    pub fn metrics(&self) -> PdcpMetrics {
        PdcpMetrics {
            tx: self.tx.metrics().clone(),
            rx: self.rx.metrics().clone(),
        }
    }

    /// Return the metrics of both entities and reset them
    pub fn take_metrics(&mut self) -> PdcpMetrics {
        PdcpMetrics {
            tx: self.tx.take_metrics(),
            rx: self.rx.take_metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PdcpTimer, RlcMode, SnSize};
    use crate::security::SecurityDirection;
    use crate::test_helpers::{drain, nia2_nea2, rx_config, test_primitives, tx_config};
    use interfaces::{ControlChannel, ControlNotification, LowerLayerChannel, LowerLayerMessage, PdcpSide, UpperDataChannel};

    struct Peer {
        entity: PdcpEntity,
        lower_rx: UnboundedReceiver<LowerLayerMessage>,
        sdu_rx: UnboundedReceiver<Bytes>,
        control_rx: UnboundedReceiver<ControlNotification>,
    }

    impl Peer {
        fn pdus(&mut self) -> Vec<Bytes> {
            drain(&mut self.lower_rx)
                .into_iter()
                .filter_map(|msg| match msg {
                    LowerLayerMessage::NewPdu { pdu, .. } => Some(pdu),
                    LowerLayerMessage::DiscardPdu { .. } => None,
                })
                .collect()
        }
    }

    fn peer(tx_dir: SecurityDirection, rx_dir: SecurityDirection) -> Peer {
        let rb_id = RbId::Drb(1);
        let mut tx = tx_config(RlcMode::Am, SnSize::Size18, Some(PdcpTimer::from_millis(500)));
        tx.direction = tx_dir;
        let mut rx = rx_config(RlcMode::Am, SnSize::Size18, PdcpTimer::from_millis(40));
        rx.direction = rx_dir;

        let (tx_lower, lower_rx) = LowerLayerChannel::new();
        let (rx_upper_dn, sdu_rx) = UpperDataChannel::new();
        let (tx_upper_cn, control_rx) = ControlChannel::new(rb_id, PdcpSide::Tx);
        let rx_upper_cn = tx_upper_cn.for_side(PdcpSide::Rx);

        let notifiers = PdcpNotifiers {
            tx_lower: Box::new(tx_lower),
            tx_upper_cn: Box::new(tx_upper_cn),
            rx_upper_dn: Box::new(rx_upper_dn),
            rx_upper_cn: Box::new(rx_upper_cn),
        };
        let mut entity =
            PdcpEntity::new(1, rb_id, PdcpEntityConfig { tx, rx }, test_primitives(), notifiers).unwrap();
        entity.configure_security(&nia2_nea2()).unwrap();
        entity.enable_security(true, true).unwrap();
        Peer {
            entity,
            lower_rx,
            sdu_rx,
            control_rx,
        }
    }

    fn gnb_and_ue() -> (Peer, Peer) {
        (
            peer(SecurityDirection::Downlink, SecurityDirection::Uplink),
            peer(SecurityDirection::Uplink, SecurityDirection::Downlink),
        )
    }

    #[test]
    fn test_protected_round_trip() {
        let (mut gnb, mut ue) = gnb_and_ue();
        let sdus: Vec<Bytes> = (0..20u8).map(|i| Bytes::from(vec![i; 1 + i as usize])).collect();
        for sdu in &sdus {
            gnb.entity.handle_sdu(sdu.clone());
        }
        for pdu in gnb.pdus() {
            ue.entity.handle_pdu(pdu);
        }

        assert_eq!(drain(&mut ue.sdu_rx), sdus);
        let metrics = ue.entity.metrics();
        assert_eq!(metrics.rx.num_integrity_verified_pdus, 20);
        assert_eq!(metrics.rx.num_integrity_failed_pdus, 0);
        assert!(drain(&mut ue.control_rx).is_empty());
    }

    #[test]
    fn test_direction_mismatch_fails_integrity() {
        let (mut gnb, _) = gnb_and_ue();
        let (mut other_gnb, _) = gnb_and_ue();
        gnb.entity.handle_sdu(Bytes::from_static(b"downlink"));
        for pdu in gnb.pdus() {
            // RX of a gNB expects uplink
            other_gnb.entity.handle_pdu(pdu);
        }
        assert!(drain(&mut other_gnb.sdu_rx).is_empty());
        assert_eq!(other_gnb.entity.metrics().rx.num_integrity_failed_pdus, 1);
    }

    #[test]
    fn test_status_report_round_trip() {
        let (mut gnb, mut ue) = gnb_and_ue();
        for i in 0..10u8 {
            gnb.entity.handle_sdu(Bytes::from(vec![i]));
        }
        // COUNT 3 and 6 lost on the air interface
        for (count, pdu) in gnb.pdus().into_iter().enumerate() {
            if count != 3 && count != 6 {
                ue.entity.handle_pdu(pdu);
            }
        }
        assert_eq!(ue.entity.rx().state().rx_deliv, 3);

        ue.entity.send_status_report();
        let report = ue.pdus();
        assert_eq!(report.len(), 1);

        gnb.entity.handle_pdu(report[0].clone());
        let tx = gnb.entity.tx();
        let buffered: Vec<u32> = (0..10).filter(|count| tx.is_buffered(*count)).collect();
        assert_eq!(buffered, vec![3, 6]);
        assert_eq!(tx.state().tx_next_ack, 3);
    }

    #[test]
    fn test_data_recovery_retransmits_missing() {
        let (mut gnb, mut ue) = gnb_and_ue();
        for i in 0..4u8 {
            gnb.entity.handle_sdu(Bytes::from(vec![i]));
        }
        let pdus = gnb.pdus();
        ue.entity.handle_pdu(pdus[0].clone());
        ue.entity.handle_pdu(pdus[2].clone());

        // UE reports its state, gNB drops acknowledged SDUs and retransmits the rest
        ue.entity.send_status_report();
        for report in ue.pdus() {
            gnb.entity.handle_pdu(report);
        }
        gnb.entity.data_recovery();
        let recovered = gnb.pdus();
        // Own status report first, then COUNT 1 and 3
        assert_eq!(recovered.len(), 3);
        for pdu in recovered.into_iter().skip(1) {
            ue.entity.handle_pdu(pdu);
        }

        let delivered: Vec<u8> = drain(&mut ue.sdu_rx).iter().map(|sdu| sdu[0]).collect();
        assert_eq!(delivered, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reestablish_keeps_am_bearer_in_sync() {
        let (mut gnb, mut ue) = gnb_and_ue();
        for i in 0..3u8 {
            gnb.entity.handle_sdu(Bytes::from(vec![i]));
        }
        gnb.pdus();

        gnb.entity.reestablish(&nia2_nea2());
        ue.entity.reestablish(&nia2_nea2());
        for pdu in gnb.pdus() {
            ue.entity.handle_pdu(pdu);
        }
        assert_eq!(drain(&mut ue.sdu_rx).len(), 3);
    }

    #[test]
    fn test_tick_drives_both_entities() {
        let (mut gnb, mut ue) = gnb_and_ue();
        gnb.entity.handle_sdu(Bytes::from_static(b"a"));
        gnb.entity.handle_sdu(Bytes::from_static(b"b"));
        let pdus = gnb.pdus();
        ue.entity.handle_pdu(pdus[1].clone());
        assert!(ue.entity.rx().is_reordering());

        ue.entity.tick(Duration::from_millis(40));
        assert_eq!(drain(&mut ue.sdu_rx), vec![Bytes::from_static(b"b")]);

        gnb.entity.tick(Duration::from_millis(500));
        let metrics = gnb.entity.take_metrics();
        assert_eq!(metrics.tx.num_discard_timeouts, 2);
        assert_eq!(gnb.entity.metrics(), PdcpMetrics::default());
    }
}
