//! Message Types for PDCP Notifications
//!
//! Defines the messages carried by the channel-backed notifiers

use bytes::Bytes;
use common::types::RbId;
use serde::{Deserialize, Serialize};

/// Message from the PDCP TX entity to the lower layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerLayerMessage {
    /// New PDU for transmission
    NewPdu {
        /// Protected PDU including header
        pdu: Bytes,
        /// Whether this is a retransmission of an earlier PDU
        is_retx: bool,
    },
    /// Discard request for a PDU not yet transmitted
    DiscardPdu {
        /// Truncated sequence number of the PDU
        pdcp_sn: u32,
    },
}

/// Which half of the bearer raised a control event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdcpSide {
    Tx,
    Rx,
}

/// Control plane event raised by a PDCP entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEvent {
    /// COUNT approaching its maximum, key refresh required
    MaxCountReached,
    /// Unrecoverable failure of the data path
    ProtocolFailure,
    /// Integrity verification failure
    IntegrityFailure,
}

/// Control plane event tagged with its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlNotification {
    /// Bearer raising the event
    pub rb_id: RbId,
    /// Entity raising the event
    pub side: PdcpSide,
    /// The event
    pub event: ControlEvent,
}

impl ControlNotification {
    /// Create a new control notification
    pub fn new(rb_id: RbId, side: PdcpSide, event: ControlEvent) -> Self {
        Self { rb_id, side, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_notification_serialization() {
        let notif = ControlNotification::new(RbId::Drb(1), PdcpSide::Tx, ControlEvent::ProtocolFailure);

        let serialized = serde_json::to_string(&notif).unwrap();
        let deserialized: ControlNotification = serde_json::from_str(&serialized).unwrap();

        assert_eq!(notif, deserialized);
    }
}
