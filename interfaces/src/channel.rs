//! Channel-backed Notifiers
//!
//! Implements the PDCP notifier traits on top of unbounded tokio channels. A notifier
//! never blocks the entity: if the receiving side is gone the message is dropped and
//! logged.

use crate::message_types::{ControlEvent, ControlNotification, LowerLayerMessage, PdcpSide};
use crate::{
    PdcpRxStatusHandler, PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxLowerNotifier,
    PdcpTxUpperControlNotifier,
};
use bytes::Bytes;
use common::types::RbId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Lower layer notifier forwarding PDUs and discards over a channel
#[derive(Debug, Clone)]
pub struct LowerLayerChannel {
    tx: UnboundedSender<LowerLayerMessage>,
}

impl LowerLayerChannel {
    /// Create the notifier and the receiving end for the lower layer
    pub fn new() -> (Self, UnboundedReceiver<LowerLayerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PdcpTxLowerNotifier for LowerLayerChannel {
    fn on_new_pdu(&self, pdu: Bytes, is_retx: bool) {
        if self.tx.send(LowerLayerMessage::NewPdu { pdu, is_retx }).is_err() {
            debug!("Lower layer channel closed, dropping PDU");
        }
    }

    fn on_discard_pdu(&self, pdcp_sn: u32) {
        if self.tx.send(LowerLayerMessage::DiscardPdu { pdcp_sn }).is_err() {
            debug!("Lower layer channel closed, dropping discard. sn={}", pdcp_sn);
        }
    }
}

/// Upper layer notifier forwarding SDUs over a channel
#[derive(Debug, Clone)]
pub struct UpperDataChannel {
    tx: UnboundedSender<Bytes>,
}

impl UpperDataChannel {
    pub fn new() -> (Self, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PdcpRxUpperDataNotifier for UpperDataChannel {
    fn on_new_sdu(&self, sdu: Bytes) {
        if self.tx.send(sdu).is_err() {
            debug!("Upper layer channel closed, dropping SDU");
        }
    }
}

/// Control plane notifier tagging each event with its bearer and entity
#[derive(Debug, Clone)]
pub struct ControlChannel {
    rb_id: RbId,
    side: PdcpSide,
    tx: UnboundedSender<ControlNotification>,
}

impl ControlChannel {
    /// Create a notifier for one entity and the control plane receiving end
    pub fn new(rb_id: RbId, side: PdcpSide) -> (Self, UnboundedReceiver<ControlNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rb_id, side, tx }, rx)
    }

    /// Notifier for the other entity of the same bearer, sharing the receiving end
    pub fn for_side(&self, side: PdcpSide) -> Self {
        Self {
            rb_id: self.rb_id,
            side,
            tx: self.tx.clone(),
        }
    }

    fn notify(&self, event: ControlEvent) {
        let notif = ControlNotification::new(self.rb_id, self.side, event);
        if self.tx.send(notif).is_err() {
            debug!("Control channel closed, dropping {:?}", notif);
        }
    }
}

impl PdcpTxUpperControlNotifier for ControlChannel {
    fn on_max_count_reached(&self) {
        self.notify(ControlEvent::MaxCountReached);
    }

    fn on_protocol_failure(&self) {
        self.notify(ControlEvent::ProtocolFailure);
    }
}

impl PdcpRxUpperControlNotifier for ControlChannel {
    fn on_max_count_reached(&self) {
        self.notify(ControlEvent::MaxCountReached);
    }

    fn on_protocol_failure(&self) {
        self.notify(ControlEvent::ProtocolFailure);
    }

    fn on_integrity_failure(&self) {
        self.notify(ControlEvent::IntegrityFailure);
    }
}

/// Status report handler forwarding reports from the RX to the TX entity
#[derive(Debug, Clone)]
pub struct StatusReportChannel {
    tx: UnboundedSender<Bytes>,
}

impl StatusReportChannel {
    pub fn new() -> (Self, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PdcpRxStatusHandler for StatusReportChannel {
    fn on_status_report(&self, status: Bytes) {
        if self.tx.send(status).is_err() {
            debug!("Status report channel closed, dropping report");
        }
    }
}
