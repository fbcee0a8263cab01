//! Per identifier pair configuration.

use core::time::Duration;
use embedded_can::{Id, StandardId};

use crate::errors::ConfigError;
use crate::pdu::{MAX_PAYLOAD_LEN, duration_to_st_min};

/// Configuration for one ISO-TP conversation (one identifier pair).
#[derive(Debug, Clone)]
pub struct TpConfig {
    /// Identifier our frames are sent on (the remote node's address).
    pub tx_id: Id,
    /// Identifier of frames addressed to us (our local address).
    pub rx_id: Id,
    /// Consecutive frames we accept before issuing a new flow control (0 = unbounded).
    pub block_size: u8,
    /// Minimum separation time we ask the remote sender to keep between consecutive frames.
    pub st_min: Duration,
    /// Filler byte for unused bytes of transmitted frames.
    pub padding: u8,
    /// Largest payload accepted in either direction.
    pub max_payload_len: usize,
    /// Sender timeout waiting for a Flow Control frame (N_Bs).
    pub n_bs: Duration,
    /// Receiver timeout waiting for the next Consecutive Frame (N_Cr).
    pub n_cr: Duration,
    /// Delay before re-issuing Flow Control at a block boundary.
    pub fc_guard_delay: Duration,
    /// Consecutive FC(Wait) frames tolerated before aborting (`None` = unlimited).
    pub max_wait_frames: Option<u32>,
    /// Upper bound on an entire send (`None` = only per-phase timeouts apply).
    pub transfer_timeout: Option<Duration>,
}

impl Default for TpConfig {
    fn default() -> Self {
        Self {
            tx_id: standard(0x727),
            rx_id: standard(0x72F),
            block_size: 3,
            st_min: Duration::from_millis(20),
            padding: 0x00,
            max_payload_len: MAX_PAYLOAD_LEN,
            n_bs: Duration::from_millis(1000),
            n_cr: Duration::from_millis(1000),
            fc_guard_delay: Duration::from_millis(50),
            max_wait_frames: None,
            transfer_timeout: None,
        }
    }
}

fn standard(raw: u16) -> Id {
    // 0x727 and 0x72F both fit in 11 bits.
    Id::Standard(StandardId::new(raw).unwrap_or(StandardId::ZERO))
}

impl TpConfig {
    /// Config for the pair `(tx_id, rx_id)` with all other settings at their defaults.
    pub fn new(tx_id: impl Into<Id>, rx_id: impl Into<Id>) -> Self {
        Self {
            tx_id: tx_id.into(),
            rx_id: rx_id.into(),
            ..Self::default()
        }
    }

    /// The same settings with transmit and receive identifiers swapped: the far side's view.
    pub fn mirrored(&self) -> Self {
        Self {
            tx_id: self.rx_id,
            rx_id: self.tx_id,
            ..self.clone()
        }
    }

    /// Reject invalid limits or mirrored IDs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_len == 0 || self.max_payload_len > MAX_PAYLOAD_LEN {
            return Err(ConfigError::MaxPayloadLen(self.max_payload_len));
        }
        if self.tx_id == self.rx_id {
            return Err(ConfigError::MirroredIds);
        }
        self.st_min_byte()?;
        Ok(())
    }

    /// Advertised STmin in its Flow Control encoding.
    pub fn st_min_byte(&self) -> Result<u8, ConfigError> {
        duration_to_st_min(self.st_min).ok_or(ConfigError::StMin(self.st_min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_reference_node() {
        let cfg = TpConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.block_size, 3);
        assert_eq!(cfg.st_min_byte(), Ok(0x14));
        assert_eq!(cfg.fc_guard_delay, Duration::from_millis(50));
    }

    #[test]
    fn validate_rejects_bad_limits() {
        let cfg = TpConfig {
            max_payload_len: 0,
            ..TpConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MaxPayloadLen(0)));

        let cfg = TpConfig {
            max_payload_len: 4096,
            ..TpConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MaxPayloadLen(4096)));

        let cfg = TpConfig {
            st_min: Duration::from_millis(200),
            ..TpConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::StMin(_))));
    }

    #[test]
    fn validate_rejects_identical_ids() {
        let id = StandardId::new(0x7E0).unwrap();
        assert_eq!(TpConfig::new(id, id).validate(), Err(ConfigError::MirroredIds));
    }

    #[test]
    fn mirrored_swaps_ids_only() {
        let cfg = TpConfig {
            block_size: 8,
            ..TpConfig::default()
        };
        let other = cfg.mirrored();
        assert_eq!(other.tx_id, cfg.rx_id);
        assert_eq!(other.rx_id, cfg.tx_id);
        assert_eq!(other.block_size, 8);
    }
}
