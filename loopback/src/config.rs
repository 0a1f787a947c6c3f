//! Loopback Configuration
//!
//! File format of the loopback runner (YAML or TOML, chosen by extension) and its
//! conversion into PDCP entity configurations.

use anyhow::{anyhow, Context, Result};
use common::types::RbId;
use pdcp::{
    CipheringAlgorithm, IntegrityAlgorithm, PdcpEntityConfig, PdcpMaxCount, PdcpRxConfig, PdcpTimer, PdcpTxConfig,
    RlcMode, SecurityConfig, SecurityDirection, SnSize,
};
use pdcp::config::PdcpCustomTxConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoopbackConfig {
    /// Bearer under test
    #[serde(default)]
    pub bearer: BearerConfig,
    /// AS security
    #[serde(default)]
    pub security: SecuritySection,
    /// Simulated radio link
    #[serde(default)]
    pub link: LinkConfig,
    /// Generated traffic
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// PDCP-Config of the bearer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    /// Signalling instead of data bearer
    #[serde(default)]
    pub srb: bool,
    /// Bearer identity
    #[serde(default = "default_rb_index")]
    pub rb_index: u8,
    /// "am" or "um"
    #[serde(default = "default_rlc_mode")]
    pub rlc_mode: String,
    /// 12 or 18
    #[serde(default = "default_sn_size")]
    pub sn_size: u8,
    /// discardTimer in ms, -1 for infinity, absent if not configured
    pub discard_timer_ms: Option<i64>,
    /// t-Reordering in ms, -1 for infinity
    #[serde(default = "default_t_reordering_ms")]
    pub t_reordering_ms: i64,
    #[serde(default = "default_true")]
    pub status_report_required: bool,
    /// SDUs handed to the link and not yet reported as transmitted
    #[serde(default = "default_rlc_sdu_queue")]
    pub rlc_sdu_queue: u32,
    /// Command queue depth of each bearer task
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_rb_index() -> u8 {
    1
}

fn default_rlc_mode() -> String {
    "am".to_string()
}

fn default_sn_size() -> u8 {
    18
}

fn default_t_reordering_ms() -> i64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_rlc_sdu_queue() -> u32 {
    4096
}

fn default_queue_size() -> usize {
    1024
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            srb: false,
            rb_index: default_rb_index(),
            rlc_mode: default_rlc_mode(),
            sn_size: default_sn_size(),
            discard_timer_ms: Some(500),
            t_reordering_ms: default_t_reordering_ms(),
            status_report_required: true,
            rlc_sdu_queue: default_rlc_sdu_queue(),
            queue_size: default_queue_size(),
        }
    }
}

/// Security section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecuritySection {
    /// Integrity algorithm index (0-3), absent if not configured
    #[serde(default = "default_nia")]
    pub nia: Option<u8>,
    /// Ciphering algorithm index (0-3)
    #[serde(default)]
    pub nea: u8,
    /// Integrity key, 32 hex digits
    #[serde(default = "default_key")]
    pub k_int: String,
    /// Ciphering key, 32 hex digits
    #[serde(default = "default_key")]
    pub k_enc: String,
    #[serde(default = "default_true")]
    pub integrity_enabled: bool,
    #[serde(default = "default_true")]
    pub ciphering_enabled: bool,
}

fn default_nia() -> Option<u8> {
    Some(0)
}

fn default_key() -> String {
    "00000000000000000000000000000000".to_string()
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            nia: default_nia(),
            nea: 0,
            k_int: default_key(),
            k_enc: default_key(),
            integrity_enabled: true,
            ciphering_enabled: true,
        }
    }
}

/// Simulated link between the two peers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Probability of losing a PDU (0.0 to 1.0)
    #[serde(default)]
    pub loss_rate: f64,
    /// One-way delay in ms
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Uniform extra delay in ms, reorders PDUs
    #[serde(default)]
    pub jitter_ms: u64,
    /// Seed of the loss and jitter generator
    #[serde(default)]
    pub seed: u64,
}

fn default_delay_ms() -> u64 {
    5
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay_ms: default_delay_ms(),
            jitter_ms: 0,
            seed: 0,
        }
    }
}

/// Generated downlink traffic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    #[serde(default = "default_num_sdus")]
    pub num_sdus: u64,
    /// SDU size in bytes, at least 8 for the sequence number
    #[serde(default = "default_sdu_size")]
    pub sdu_size: usize,
    /// Gap between SDUs in microseconds
    #[serde(default = "default_sdu_interval_us")]
    pub sdu_interval_us: u64,
    /// Period of status report plus data recovery, 0 disables it
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    /// Time allowed for in-flight PDUs after the last SDU
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_num_sdus() -> u64 {
    1000
}

fn default_sdu_size() -> usize {
    100
}

fn default_sdu_interval_us() -> u64 {
    1000
}

fn default_recovery_interval_ms() -> u64 {
    200
}

fn default_drain_ms() -> u64 {
    1000
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_sdus: default_num_sdus(),
            sdu_size: default_sdu_size(),
            sdu_interval_us: default_sdu_interval_us(),
            recovery_interval_ms: default_recovery_interval_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log filter used when neither RUST_LOG nor --log-level is given
    pub level: Option<String>,
}

impl LoopbackConfig {
    /// Load configuration from a YAML or TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match extension {
            "yml" | "yaml" => Ok(serde_yaml::from_str(&contents)?),
            "toml" => Ok(toml::from_str(&contents)?),
            _ => Err(anyhow!("Unknown configuration format: {}", path)),
        }
    }

    pub fn rb_id(&self) -> Result<RbId> {
        let rb_id = if self.bearer.srb {
            RbId::srb(self.bearer.rb_index)
        } else {
            RbId::drb(self.bearer.rb_index)
        };
        rb_id.ok_or_else(|| anyhow!("Invalid bearer index: {}", self.bearer.rb_index))
    }

    pub fn rlc_mode(&self) -> Result<RlcMode> {
        match self.bearer.rlc_mode.to_lowercase().as_str() {
            "am" => Ok(RlcMode::Am),
            "um" => Ok(RlcMode::Um),
            other => Err(anyhow!("Invalid RLC mode: {}", other)),
        }
    }

    pub fn sn_size(&self) -> Result<SnSize> {
        Ok(SnSize::from_bits(self.bearer.sn_size)?)
    }

    /// Entity configuration of the peer transmitting in `tx_direction`
    pub fn entity_config(&self, tx_direction: SecurityDirection) -> Result<PdcpEntityConfig> {
        let rx_direction = match tx_direction {
            SecurityDirection::Downlink => SecurityDirection::Uplink,
            SecurityDirection::Uplink => SecurityDirection::Downlink,
        };
        let rlc_mode = self.rlc_mode()?;
        let sn_size = self.sn_size()?;
        let tx = PdcpTxConfig {
            rlc_mode,
            sn_size,
            direction: tx_direction,
            discard_timer: self.bearer.discard_timer_ms.map(timer_from_ms).transpose()?,
            status_report_required: self.bearer.status_report_required,
            max_count: PdcpMaxCount::default(),
            custom: PdcpCustomTxConfig {
                rlc_sdu_queue: self.bearer.rlc_sdu_queue,
                warn_on_drop: false,
            },
        };
        let rx = PdcpRxConfig {
            rlc_mode,
            sn_size,
            direction: rx_direction,
            t_reordering: timer_from_ms(self.bearer.t_reordering_ms)?,
            max_count: PdcpMaxCount::default(),
            escalate_integrity_failure: false,
        };
        let rb_id = self.rb_id()?;
        tx.validate(rb_id)?;
        rx.validate(rb_id)?;
        Ok(PdcpEntityConfig { tx, rx })
    }

    pub fn security_config(&self) -> Result<SecurityConfig> {
        let sec = &self.security;
        let integ_algo = match sec.nia {
            Some(0) => Some(IntegrityAlgorithm::Nia0),
            Some(1) => Some(IntegrityAlgorithm::Nia1),
            Some(2) => Some(IntegrityAlgorithm::Nia2),
            Some(3) => Some(IntegrityAlgorithm::Nia3),
            Some(other) => return Err(anyhow!("Invalid integrity algorithm: NIA{}", other)),
            None => None,
        };
        let cipher_algo = match sec.nea {
            0 => CipheringAlgorithm::Nea0,
            1 => CipheringAlgorithm::Nea1,
            2 => CipheringAlgorithm::Nea2,
            3 => CipheringAlgorithm::Nea3,
            other => return Err(anyhow!("Invalid ciphering algorithm: NEA{}", other)),
        };
        Ok(SecurityConfig {
            integ_algo,
            cipher_algo,
            k_int: integ_algo.map(|_| parse_key(&sec.k_int)).transpose()?,
            k_enc: parse_key(&sec.k_enc)?,
        })
    }

    /// Sanity checks on the parts not covered by the PDCP validation
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.link.loss_rate) {
            return Err(anyhow!("Invalid loss rate: {}", self.link.loss_rate));
        }
        if self.traffic.sdu_size < 8 {
            return Err(anyhow!("SDU size must be at least 8 bytes: {}", self.traffic.sdu_size));
        }
        self.entity_config(SecurityDirection::Downlink)?;
        self.security_config()?;
        Ok(())
    }
}

/// Timer value in ms, -1 meaning infinity
fn timer_from_ms(ms: i64) -> Result<PdcpTimer> {
    match ms {
        -1 => Ok(PdcpTimer::Infinity),
        ms if ms >= 0 => Ok(PdcpTimer::from_millis(ms as u64)),
        ms => Err(anyhow!("Invalid timer value: {} ms", ms)),
    }
}

fn parse_key(hex: &str) -> Result<[u8; 16]> {
    if hex.len() != 32 {
        return Err(anyhow!("Security key must be 32 hex digits: {}", hex));
    }
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .with_context(|| format!("Invalid security key: {}", hex))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
bearer:
  rlc_mode: um
  sn_size: 12
  t_reordering_ms: -1
link:
  loss_rate: 0.1
  delay_ms: 2
traffic:
  num_sdus: 10
"#;
        let config: LoopbackConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.rlc_mode().unwrap(), RlcMode::Um);
        assert_eq!(config.bearer.discard_timer_ms, None);

        let entity = config.entity_config(SecurityDirection::Downlink).unwrap();
        assert_eq!(entity.rx.t_reordering, PdcpTimer::Infinity);
        assert_eq!(entity.rx.direction, SecurityDirection::Uplink);
        assert!(entity.tx.discard_timer.is_none());
        assert_eq!(config.traffic.num_sdus, 10);
        assert_eq!(config.traffic.sdu_size, 100);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[bearer]
discard_timer_ms = 100
sn_size = 18

[security]
nia = 2
nea = 2
k_int = "000102030405060708090a0b0c0d0e0f"
"#;
        let config: LoopbackConfig = toml::from_str(toml_str).unwrap();
        let sec = config.security_config().unwrap();
        assert_eq!(sec.integ_algo, Some(IntegrityAlgorithm::Nia2));
        assert_eq!(sec.cipher_algo, CipheringAlgorithm::Nea2);
        assert_eq!(sec.k_int.unwrap()[15], 0x0f);

        let entity = config.entity_config(SecurityDirection::Uplink).unwrap();
        assert_eq!(entity.tx.discard_timer, Some(PdcpTimer::from_millis(100)));
        assert_eq!(entity.tx.sn_size, SnSize::Size18);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = LoopbackConfig::default();
        config.bearer.srb = true;
        // SRBs only support 12-bit SNs
        assert!(config.validate().is_err());

        let mut config = LoopbackConfig::default();
        config.bearer.t_reordering_ms = -5;
        assert!(config.validate().is_err());

        let mut config = LoopbackConfig::default();
        config.security.k_enc = "zz".repeat(16);
        assert!(config.validate().is_err());

        let mut config = LoopbackConfig::default();
        config.link.loss_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
