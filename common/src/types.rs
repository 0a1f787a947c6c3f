//! Common Types for the PDCP data plane
//!
//! Defines radio bearer identifiers shared by the protocol layers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio bearer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbType {
    /// Signalling radio bearer
    Srb,
    /// Data radio bearer
    Drb,
}

/// Radio bearer identity
///
/// SRB0 carries no PDCP entity, so PDCP bearers are SRB1-3 and DRB1-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbId {
    /// Signalling radio bearer
    Srb(u8),
    /// Data radio bearer
    Drb(u8),
}

impl RbId {
    /// Highest SRB identity
    pub const MAX_SRB_ID: u8 = 3;
    /// Highest DRB identity
    pub const MAX_DRB_ID: u8 = 32;

    /// Create an SRB identity with validation (1-3)
    pub fn srb(id: u8) -> Option<Self> {
        if (1..=Self::MAX_SRB_ID).contains(&id) {
            Some(Self::Srb(id))
        } else {
            None
        }
    }

    /// Create a DRB identity with validation (1-32)
    pub fn drb(id: u8) -> Option<Self> {
        if (1..=Self::MAX_DRB_ID).contains(&id) {
            Some(Self::Drb(id))
        } else {
            None
        }
    }

    /// Get the bearer type
    pub fn rb_type(&self) -> RbType {
        match self {
            RbId::Srb(_) => RbType::Srb,
            RbId::Drb(_) => RbType::Drb,
        }
    }

    pub fn is_srb(&self) -> bool {
        self.rb_type() == RbType::Srb
    }

    pub fn is_drb(&self) -> bool {
        self.rb_type() == RbType::Drb
    }

    /// Numeric identity within the bearer type
    pub fn value(&self) -> u8 {
        match self {
            RbId::Srb(id) | RbId::Drb(id) => *id,
        }
    }

    /// BEARER input of the security algorithms (TS 33.501 section 6.4.3.1)
    pub fn bearer_id(&self) -> u8 {
        self.value().saturating_sub(1)
    }
}

impl fmt::Display for RbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbId::Srb(id) => write!(f, "SRB{}", id),
            RbId::Drb(id) => write!(f, "DRB{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rb_id_validation() {
        assert!(RbId::srb(0).is_none());
        assert!(RbId::srb(1).is_some());
        assert!(RbId::srb(4).is_none());
        assert!(RbId::drb(32).is_some());
        assert!(RbId::drb(33).is_none());
    }

    #[test]
    fn test_bearer_id() {
        assert_eq!(RbId::Srb(1).bearer_id(), 0);
        assert_eq!(RbId::Drb(5).bearer_id(), 4);
        assert!(RbId::Srb(2).is_srb());
        assert_eq!(RbId::Drb(1).rb_type(), RbType::Drb);
    }

    #[test]
    fn test_rb_id_display() {
        assert_eq!(RbId::Srb(2).to_string(), "SRB2");
        assert_eq!(RbId::Drb(1).to_string(), "DRB1");
    }
}
