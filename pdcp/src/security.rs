//! PDCP Security
//!
//! Integrity protection and ciphering of PDCP data PDUs (TS 38.323 sections 5.8 and 5.9).
//! The NIA1-3/NEA1-3 primitives themselves are supplied by the integrator through a
//! [`SecurityPrimitives`] table; the algorithm is resolved to a function pointer once per
//! configuration so the per-PDU path is a direct call.

use crate::PdcpError;
use bytes::BytesMut;
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use tracing::{debug, trace, warn};

/// 128-bit security key
pub type SecKey = [u8; 16];

/// MAC-I length in bytes
pub const MAC_LEN: usize = 4;

/// MAC-I
pub type SecMac = [u8; MAC_LEN];

/// Integrity primitive: MAC-I over `msg` for the given COUNT, bearer and direction
pub type IntegrityFn =
    fn(key: &SecKey, count: u32, bearer_id: u8, direction: SecurityDirection, msg: &[u8]) -> SecMac;

/// Ciphering primitive: encrypts or decrypts `data` in place
pub type CipheringFn =
    fn(key: &SecKey, count: u32, bearer_id: u8, direction: SecurityDirection, data: &mut [u8]);

/// DIRECTION input of the security primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SecurityDirection {
    Uplink = 0,
    Downlink = 1,
}

/// NR integrity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum IntegrityAlgorithm {
    Nia0 = 0,
    Nia1 = 1,
    Nia2 = 2,
    Nia3 = 3,
}

/// NR ciphering algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CipheringAlgorithm {
    Nea0 = 0,
    Nea1 = 1,
    Nea2 = 2,
    Nea3 = 3,
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NIA{}", *self as u8)
    }
}

impl fmt::Display for CipheringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NEA{}", *self as u8)
    }
}

/// Null integrity algorithm: all-zero MAC-I
pub fn nia0(_key: &SecKey, _count: u32, _bearer_id: u8, _direction: SecurityDirection, _msg: &[u8]) -> SecMac {
    [0; MAC_LEN]
}

/// Table of the non-null security primitives available to PDCP
#[derive(Clone, Copy, Default)]
pub struct SecurityPrimitives {
    pub nia1: Option<IntegrityFn>,
    pub nia2: Option<IntegrityFn>,
    pub nia3: Option<IntegrityFn>,
    pub nea1: Option<CipheringFn>,
    pub nea2: Option<CipheringFn>,
    pub nea3: Option<CipheringFn>,
}

impl SecurityPrimitives {
    /// Integrity function for an algorithm
    pub fn integrity(&self, algo: IntegrityAlgorithm) -> Result<IntegrityFn, PdcpError> {
        let func = match algo {
            IntegrityAlgorithm::Nia0 => Some(nia0 as IntegrityFn),
            IntegrityAlgorithm::Nia1 => self.nia1,
            IntegrityAlgorithm::Nia2 => self.nia2,
            IntegrityAlgorithm::Nia3 => self.nia3,
        };
        func.ok_or_else(|| PdcpError::UnsupportedAlgorithm(algo.to_string()))
    }

    /// Ciphering function for an algorithm, `None` for NEA0
    pub fn ciphering(&self, algo: CipheringAlgorithm) -> Result<Option<CipheringFn>, PdcpError> {
        let func = match algo {
            CipheringAlgorithm::Nea0 => return Ok(None),
            CipheringAlgorithm::Nea1 => self.nea1,
            CipheringAlgorithm::Nea2 => self.nea2,
            CipheringAlgorithm::Nea3 => self.nea3,
        };
        func.map(Some)
            .ok_or_else(|| PdcpError::UnsupportedAlgorithm(algo.to_string()))
    }
}

impl fmt::Debug for SecurityPrimitives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityPrimitives")
            .field("nia1", &self.nia1.is_some())
            .field("nia2", &self.nia2.is_some())
            .field("nia3", &self.nia3.is_some())
            .field("nea1", &self.nea1.is_some())
            .field("nea2", &self.nea2.is_some())
            .field("nea3", &self.nea3.is_some())
            .finish()
    }
}

/// AS security configuration of a bearer
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Integrity algorithm, absent if integrity protection is not configured
    pub integ_algo: Option<IntegrityAlgorithm>,
    pub cipher_algo: CipheringAlgorithm,
    pub k_int: Option<SecKey>,
    pub k_enc: SecKey,
}

impl SecurityConfig {
    /// NIA0/NEA0 with zero keys
    pub fn null() -> Self {
        Self {
            integ_algo: Some(IntegrityAlgorithm::Nia0),
            cipher_algo: CipheringAlgorithm::Nea0,
            k_int: Some([0; 16]),
            k_enc: [0; 16],
        }
    }
}

// Keys stay out of the logs
impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("integ_algo", &self.integ_algo)
            .field("cipher_algo", &self.cipher_algo)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
struct IntegrityContext {
    algo: IntegrityAlgorithm,
    func: IntegrityFn,
    key: SecKey,
}

#[derive(Clone, Copy)]
struct CipheringContext {
    algo: CipheringAlgorithm,
    func: Option<CipheringFn>,
    key: SecKey,
}

/// Security state of one PDCP entity
pub struct SecurityEngine {
    primitives: SecurityPrimitives,
    bearer_id: u8,
    direction: SecurityDirection,
    integrity: Option<IntegrityContext>,
    ciphering: Option<CipheringContext>,
    integrity_enabled: bool,
    ciphering_enabled: bool,
}

impl fmt::Debug for SecurityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityEngine")
            .field("bearer_id", &self.bearer_id)
            .field("direction", &self.direction)
            .field("integ_algo", &self.integrity.map(|ctx| ctx.algo))
            .field("cipher_algo", &self.ciphering.map(|ctx| ctx.algo))
            .field("integrity_enabled", &self.integrity_enabled)
            .field("ciphering_enabled", &self.ciphering_enabled)
            .finish()
    }
}

impl SecurityEngine {
    /// Create an engine with no security configured and protection disabled
    pub fn new(primitives: SecurityPrimitives, bearer_id: u8, direction: SecurityDirection) -> Self {
        Self {
            primitives,
            bearer_id,
            direction,
            integrity: None,
            ciphering: None,
            integrity_enabled: false,
            ciphering_enabled: false,
        }
    }

    /// Replace algorithms and keys; on error the previous configuration is kept
    pub fn configure(&mut self, cfg: &SecurityConfig) -> Result<(), PdcpError> {
        let integrity = match (cfg.integ_algo, cfg.k_int) {
            (Some(algo), Some(key)) => Some(IntegrityContext {
                algo,
                func: self.primitives.integrity(algo)?,
                key,
            }),
            (Some(algo), None) => {
                return Err(PdcpError::InvalidConfiguration(format!(
                    "{} configured without integrity key",
                    algo
                )))
            }
            (None, _) => None,
        };
        let ciphering = CipheringContext {
            algo: cfg.cipher_algo,
            func: self.primitives.ciphering(cfg.cipher_algo)?,
            key: cfg.k_enc,
        };

        if integrity.is_none() && self.integrity_enabled {
            warn!("Integrity protection disabled, no integrity algorithm configured");
            self.integrity_enabled = false;
        }
        self.integrity = integrity;
        self.ciphering = Some(ciphering);
        debug!(
            "Security configured. integ_algo={:?} cipher_algo={} bearer_id={} dir={:?}",
            cfg.integ_algo, cfg.cipher_algo, self.bearer_id, self.direction
        );
        Ok(())
    }

    /// Switch integrity protection and ciphering on or off
    pub fn enable(&mut self, integrity: bool, ciphering: bool) -> Result<(), PdcpError> {
        if integrity && self.integrity.is_none() {
            return Err(PdcpError::SecurityNotConfigured("integrity algorithm"));
        }
        if ciphering && self.ciphering.is_none() {
            return Err(PdcpError::SecurityNotConfigured("ciphering algorithm"));
        }
        self.integrity_enabled = integrity;
        self.ciphering_enabled = ciphering;
        Ok(())
    }

    pub fn integrity_enabled(&self) -> bool {
        self.integrity_enabled
    }

    pub fn ciphering_enabled(&self) -> bool {
        self.ciphering_enabled
    }

    /// MAC-I of `msg`, all zeros while integrity protection is off
    pub fn generate_mac(&self, count: u32, msg: &[u8]) -> SecMac {
        match self.integrity {
            Some(ctx) if self.integrity_enabled => {
                (ctx.func)(&ctx.key, count, self.bearer_id, self.direction, msg)
            }
            _ => [0; MAC_LEN],
        }
    }

    /// Check a received MAC-I; NIA0 and disabled integrity always pass
    pub fn verify_mac(&self, count: u32, msg: &[u8], mac: &SecMac) -> bool {
        let ctx = match self.integrity {
            Some(ctx) if self.integrity_enabled => ctx,
            _ => return true,
        };
        if ctx.algo == IntegrityAlgorithm::Nia0 {
            return true;
        }

        let expected = (ctx.func)(&ctx.key, count, self.bearer_id, self.direction, msg);
        let is_valid = expected == *mac;
        if is_valid {
            trace!("Integrity check passed. count={} bearer_id={}", count, self.bearer_id);
        } else {
            warn!(
                "Integrity check failed. count={} bearer_id={} dir={:?} mac_expected={:02x?} mac_found={:02x?}",
                count, self.bearer_id, self.direction, expected, mac
            );
        }
        is_valid
    }

    /// Cipher or decipher `data` in place; a no-op while ciphering is off or for NEA0
    pub fn apply_ciphering(&self, count: u32, data: &mut [u8]) {
        if !self.ciphering_enabled {
            return;
        }
        if let Some(CipheringContext { func: Some(func), key, .. }) = self.ciphering {
            func(&key, count, self.bearer_id, self.direction, data);
        }
    }

    /// Protect a data PDU held in `buf` (header followed by SDU)
    ///
    /// The MAC-I covers header and SDU and is appended when `append_mac` is set; ciphering
    /// then covers everything after the header, MAC-I included.
    pub fn protect(&self, buf: &mut BytesMut, hdr_len: usize, count: u32, append_mac: bool) {
        if append_mac {
            let mac = self.generate_mac(count, buf);
            buf.extend_from_slice(&mac);
        }
        self.apply_ciphering(count, &mut buf[hdr_len..]);
    }
}
