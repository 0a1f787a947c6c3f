//! PDCP Entity Configuration
//!
//! TX and RX entity parameters as configured by RRC (TS 38.331 PDCP-Config), plus the
//! implementation specific limits used by the data path.

use crate::security::SecurityDirection;
use crate::PdcpError;
use common::types::RbId;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt;
use std::time::Duration;

/// PDCP SN size
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SnSize {
    /// 12-bit SN, 2 byte data PDU header
    Size12 = 12,
    /// 18-bit SN, 3 byte data PDU header (DRBs only)
    Size18 = 18,
}

impl SnSize {
    /// Create from a size in bits
    pub fn from_bits(bits: u8) -> Result<Self, PdcpError> {
        Self::from_u8(bits).ok_or_else(|| {
            PdcpError::InvalidConfiguration(format!("Invalid SN size: {} (must be 12 or 18 bits)", bits))
        })
    }

    /// Size in bits
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Number of distinct SN values
    pub const fn cardinality(self) -> u32 {
        1 << self.bits()
    }

    /// Window_Size, TS 38.323 section 7.2
    pub const fn window_size(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Length of the data PDU header in bytes
    pub const fn header_len(self) -> usize {
        match self {
            SnSize::Size12 => 2,
            SnSize::Size18 => 3,
        }
    }
}

impl fmt::Display for SnSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Mode of the RLC entity below the PDCP entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcMode {
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

/// Duration of a PDCP timer (discardTimer, t-Reordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdcpTimer {
    /// Timer expiring after the given duration
    Finite(Duration),
    /// Timer that never expires and is therefore never started
    Infinity,
}

impl PdcpTimer {
    pub fn from_millis(ms: u64) -> Self {
        PdcpTimer::Finite(Duration::from_millis(ms))
    }

    /// Duration of a finite timer
    pub fn duration(&self) -> Option<Duration> {
        match self {
            PdcpTimer::Finite(d) => Some(*d),
            PdcpTimer::Infinity => None,
        }
    }

    /// A finite timer of zero length (e.g. t-Reordering ms0)
    pub fn is_zero(&self) -> bool {
        matches!(self, PdcpTimer::Finite(d) if d.is_zero())
    }
}

impl fmt::Display for PdcpTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdcpTimer::Finite(d) => write!(f, "{}ms", d.as_millis()),
            PdcpTimer::Infinity => write!(f, "infinity"),
        }
    }
}

/// COUNT thresholds guarding against COUNT reuse under one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcpMaxCount {
    /// COUNT at which RRC is asked (once) to refresh the keys
    pub notify: u32,
    /// COUNT at which the data path stops for good
    pub hard: u32,
}

impl Default for PdcpMaxCount {
    fn default() -> Self {
        Self {
            notify: 0xC000_0000,
            hard: 0xFFFF_0000,
        }
    }
}

/// Implementation specific TX parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcpCustomTxConfig {
    /// Maximum number of SDUs handed to RLC and not yet reported as transmitted
    pub rlc_sdu_queue: u32,
    /// Log queue-full drops as warnings instead of info
    pub warn_on_drop: bool,
}

impl Default for PdcpCustomTxConfig {
    fn default() -> Self {
        Self {
            rlc_sdu_queue: 4096,
            warn_on_drop: false,
        }
    }
}

/// PDCP TX entity configuration
#[derive(Debug, Clone)]
pub struct PdcpTxConfig {
    /// RLC mode of the bearer
    pub rlc_mode: RlcMode,
    /// SN size
    pub sn_size: SnSize,
    /// Security direction of transmitted PDUs
    pub direction: SecurityDirection,
    /// discardTimer, not configured if `None`
    pub discard_timer: Option<PdcpTimer>,
    /// Whether status reports are sent on data recovery
    pub status_report_required: bool,
    /// COUNT thresholds
    pub max_count: PdcpMaxCount,
    /// Implementation specific parameters
    pub custom: PdcpCustomTxConfig,
}

impl PdcpTxConfig {
    /// Validate the configuration for the given bearer
    pub fn validate(&self, rb_id: RbId) -> Result<(), PdcpError> {
        validate_common(rb_id, self.sn_size, &self.max_count)?;
        if self.custom.rlc_sdu_queue == 0 {
            return Err(PdcpError::InvalidConfiguration(
                "rlc_sdu_queue must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// PDCP RX entity configuration
#[derive(Debug, Clone)]
pub struct PdcpRxConfig {
    /// RLC mode of the bearer
    pub rlc_mode: RlcMode,
    /// SN size
    pub sn_size: SnSize,
    /// Security direction of received PDUs
    pub direction: SecurityDirection,
    /// t-Reordering
    pub t_reordering: PdcpTimer,
    /// COUNT thresholds
    pub max_count: PdcpMaxCount,
    /// Report every integrity failure to the control plane
    pub escalate_integrity_failure: bool,
}

impl PdcpRxConfig {
    /// Validate the configuration for the given bearer
    pub fn validate(&self, rb_id: RbId) -> Result<(), PdcpError> {
        validate_common(rb_id, self.sn_size, &self.max_count)
    }
}

fn validate_common(rb_id: RbId, sn_size: SnSize, max_count: &PdcpMaxCount) -> Result<(), PdcpError> {
    if rb_id.is_srb() && sn_size != SnSize::Size12 {
        return Err(PdcpError::InvalidConfiguration(format!(
            "Invalid SN size for {}: sn_size={} (SRBs use 12 bits)",
            rb_id, sn_size
        )));
    }
    if max_count.notify > max_count.hard {
        return Err(PdcpError::InvalidConfiguration(format!(
            "max_count.notify={} exceeds max_count.hard={}",
            max_count.notify, max_count.hard
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_config(sn_size: SnSize) -> PdcpTxConfig {
        PdcpTxConfig {
            rlc_mode: RlcMode::Am,
            sn_size,
            direction: SecurityDirection::Downlink,
            discard_timer: Some(PdcpTimer::from_millis(100)),
            status_report_required: true,
            max_count: PdcpMaxCount::default(),
            custom: PdcpCustomTxConfig::default(),
        }
    }

    #[test]
    fn test_sn_size_parameters() {
        assert_eq!(SnSize::Size12.cardinality(), 4096);
        assert_eq!(SnSize::Size12.window_size(), 2048);
        assert_eq!(SnSize::Size12.header_len(), 2);
        assert_eq!(SnSize::Size18.cardinality(), 262144);
        assert_eq!(SnSize::Size18.window_size(), 131072);
        assert_eq!(SnSize::Size18.header_len(), 3);
    }

    #[test]
    fn test_invalid_sn_size() {
        assert_eq!(SnSize::from_bits(12), Ok(SnSize::Size12));
        assert_eq!(SnSize::from_bits(18), Ok(SnSize::Size18));
        assert!(SnSize::from_bits(16).is_err());
    }

    #[test]
    fn test_srb_requires_12_bit_sn() {
        assert!(tx_config(SnSize::Size12).validate(RbId::Srb(1)).is_ok());
        assert!(tx_config(SnSize::Size18).validate(RbId::Srb(1)).is_err());
        assert!(tx_config(SnSize::Size18).validate(RbId::Drb(1)).is_ok());
    }

    #[test]
    fn test_invalid_max_count() {
        let mut cfg = tx_config(SnSize::Size12);
        cfg.max_count = PdcpMaxCount { notify: 10, hard: 5 };
        assert!(cfg.validate(RbId::Drb(1)).is_err());
    }

    #[test]
    fn test_timer_helpers() {
        assert!(PdcpTimer::from_millis(0).is_zero());
        assert!(!PdcpTimer::Infinity.is_zero());
        assert_eq!(PdcpTimer::Infinity.duration(), None);
        assert_eq!(PdcpTimer::from_millis(35).to_string(), "35ms");
    }
}
