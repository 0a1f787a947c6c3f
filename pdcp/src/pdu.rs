//! PDCP PDU Formats
//!
//! Data PDU headers with 12 or 18 bit SN and the status report control PDU
//! (TS 38.323 section 6.2).

use crate::config::SnSize;
use crate::PdcpError;
use bytes::{BufMut, BytesMut};
use common::types::RbType;
use common::utils::{BitDecoder, BitEncoder};
use num_derive::FromPrimitive;

/// Maximum size of a control PDU in bytes
pub const CONTROL_PDU_MAX_SIZE: usize = 9000;

/// Fixed part of a status report: D/C, PDU type, reserved bits and FMC
pub const STATUS_REPORT_HEADER_SIZE: usize = 5;

/// Maximum number of bitmap bits carried by one status report
pub const STATUS_REPORT_MAX_BITMAP_BITS: usize = (CONTROL_PDU_MAX_SIZE - STATUS_REPORT_HEADER_SIZE) * 8;

/// D/C field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcField {
    Control,
    Data,
}

/// Read the D/C field from the first byte of a PDU
pub fn pdu_get_dc(first_byte: u8) -> DcField {
    if first_byte & 0x80 != 0 {
        DcField::Data
    } else {
        DcField::Control
    }
}

/// Control PDU type (CPT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ControlPduType {
    StatusReport = 0,
    InterspersedRohcFeedback = 1,
    EhcFeedback = 2,
}

/// Raw CPT field of a control PDU
pub fn control_pdu_get_cpt(first_byte: u8) -> u8 {
    (first_byte >> 4) & 0x07
}

/// Data PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPduHeader {
    /// Truncated sequence number
    pub sn: u32,
}

/// Append a data PDU header to `buf`
///
/// DRB headers carry D/C=1; SRB headers have no D/C field and their reserved bits are zero.
pub fn write_data_pdu_header(
    buf: &mut BytesMut,
    hdr: &DataPduHeader,
    rb_type: RbType,
    sn_size: SnSize,
) -> Result<(), PdcpError> {
    if hdr.sn >= sn_size.cardinality() {
        return Err(PdcpError::InvalidSn {
            sn: hdr.sn,
            sn_size: sn_size.bits(),
        });
    }
    if rb_type == RbType::Srb && sn_size != SnSize::Size12 {
        return Err(PdcpError::InvalidConfiguration(format!(
            "SRB data PDU with {}-bit SN",
            sn_size
        )));
    }

    let dc = match rb_type {
        RbType::Drb => 0x80,
        RbType::Srb => 0x00,
    };
    match sn_size {
        SnSize::Size12 => {
            buf.put_u8(dc | ((hdr.sn >> 8) & 0x0F) as u8);
            buf.put_u8(hdr.sn as u8);
        }
        SnSize::Size18 => {
            buf.put_u8(dc | ((hdr.sn >> 16) & 0x03) as u8);
            buf.put_u16(hdr.sn as u16);
        }
    }
    Ok(())
}

/// Parse the data PDU header at the start of `pdu`
pub fn read_data_pdu_header(pdu: &[u8], sn_size: SnSize) -> Result<DataPduHeader, PdcpError> {
    let hdr_len = sn_size.header_len();
    if pdu.len() < hdr_len {
        return Err(PdcpError::PduTooSmall {
            pdu_len: pdu.len(),
            min_len: hdr_len,
        });
    }

    let sn = match sn_size {
        SnSize::Size12 => (u32::from(pdu[0] & 0x0F) << 8) | u32::from(pdu[1]),
        SnSize::Size18 => {
            (u32::from(pdu[0] & 0x03) << 16) | (u32::from(pdu[1]) << 8) | u32::from(pdu[2])
        }
    };
    Ok(DataPduHeader { sn })
}

/// Write the status report header: D/C=0, CPT=0, reserved bits and FMC
pub fn write_status_report_header(enc: &mut BitEncoder, fmc: u32) {
    enc.pack(0, 1);
    enc.pack(ControlPduType::StatusReport as u64, 3);
    enc.pack(0, 4);
    enc.pack(u64::from(fmc), 32);
}

/// Check the status report header and return its FMC, leaving `dec` at the bitmap
pub fn read_status_report_header(dec: &mut BitDecoder<'_>) -> Result<u32, PdcpError> {
    let dc = dec
        .unpack(1)
        .ok_or_else(|| PdcpError::InvalidControlPdu("empty status report".to_string()))?;
    if dc != 0 {
        return Err(PdcpError::InvalidControlPdu(format!("invalid D/C field: {}", dc)));
    }

    let cpt = dec
        .unpack(3)
        .ok_or_else(|| PdcpError::InvalidControlPdu("missing PDU type".to_string()))?;
    if cpt != ControlPduType::StatusReport as u64 {
        return Err(PdcpError::InvalidControlPdu(format!("invalid PDU type: {}", cpt)));
    }

    let reserved = dec
        .unpack(4)
        .ok_or_else(|| PdcpError::InvalidControlPdu("missing reserved bits".to_string()))?;
    if reserved != 0 {
        return Err(PdcpError::InvalidControlPdu(format!(
            "reserved bits set: {:#x}",
            reserved
        )));
    }

    let fmc = dec
        .unpack(32)
        .ok_or_else(|| PdcpError::InvalidControlPdu("missing FMC".to_string()))?;
    Ok(fmc as u32)
}
