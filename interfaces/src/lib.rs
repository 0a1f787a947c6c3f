//! PDCP Layer Boundary Interfaces
//!
//! This crate defines the notifiers a PDCP entity uses to talk to the lower layer (RLC),
//! the upper layers (SDAP/RRC) and its peer entity, plus channel-backed implementations
//! of them so each entity can run on its own task.

pub mod channel;
pub mod message_types;

use bytes::Bytes;

pub use channel::{ControlChannel, LowerLayerChannel, StatusReportChannel, UpperDataChannel};
pub use message_types::{ControlEvent, ControlNotification, LowerLayerMessage, PdcpSide};

/// Lower layer notifier of the PDCP TX entity
pub trait PdcpTxLowerNotifier: Send {
    /// Hand a protected PDU to the lower layer
    fn on_new_pdu(&self, pdu: Bytes, is_retx: bool);

    /// Ask the lower layer to drop the PDU with the given SN, if not yet transmitted
    fn on_discard_pdu(&self, pdcp_sn: u32);
}

/// Control plane notifier of the PDCP TX entity
pub trait PdcpTxUpperControlNotifier: Send {
    /// COUNT passed the notification threshold, keys should be refreshed
    fn on_max_count_reached(&self);

    /// The entity cannot continue safely
    fn on_protocol_failure(&self);
}

/// Upper layer data notifier of the PDCP RX entity
pub trait PdcpRxUpperDataNotifier: Send {
    /// Deliver an SDU in ascending COUNT order
    fn on_new_sdu(&self, sdu: Bytes);
}

/// Control plane notifier of the PDCP RX entity
pub trait PdcpRxUpperControlNotifier: Send {
    fn on_max_count_reached(&self);

    fn on_protocol_failure(&self);

    /// Integrity verification failed for a received PDU
    fn on_integrity_failure(&self);
}

/// Receiver of status reports arriving at the RX entity, forwarded to the TX entity
pub trait PdcpRxStatusHandler: Send {
    fn on_status_report(&self, status: Bytes);
}

/// Source of status reports for the TX entity of the same bearer
pub trait PdcpStatusProvider {
    /// Compile a status report control PDU from the current receive state
    fn compile_status_report(&self) -> Bytes;
}
