//! Per-handle decoding and synthesis settings.
//!
//! A [`TapeConfig`] is copied into every [`crate::TapeFile`] when it is
//! opened or created.  Changing a config value afterwards never affects an
//! already-open handle.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bit-delineation frequency: halfway between the 1200 Hz "0" tone
/// and the 2400 Hz "1" tone.
pub const DEFAULT_FREQUENCY_LIMIT: f64 = 1800.0;
pub const DEFAULT_SAMPLE_RATE:     u32 = 44_100;
pub const DEFAULT_LEADER_LEN:      usize = 128;

/// Which zero crossing of the waveform starts a bit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveParity {
    /// Take the direction of the first transition out of silence.
    #[default]
    Auto,
    /// Cycles run from rising crossing to rising crossing (positive half first).
    Odd,
    /// Cycles run from falling crossing to falling crossing (negative half first).
    Even,
}

/// Order in which the bits of a tape byte appear in the bit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    /// Least significant bit first, the order the CoCo ROM writes.
    #[default]
    LsbFirst,
    MsbFirst,
}

/// 8-bit block checksum arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Wrapping sum of type, length and payload.
    #[default]
    Sum,
    Xor,
}

impl ChecksumKind {
    pub fn compute(self, block_type: u8, payload: &[u8]) -> u8 {
        let length = payload.len() as u8;
        match self {
            ChecksumKind::Sum => payload
                .iter()
                .fold(block_type.wrapping_add(length), |acc, b| acc.wrapping_add(*b)),
            ChecksumKind::Xor => payload.iter().fold(block_type ^ length, |acc, b| acc ^ b),
        }
    }
}

/// Physical container of a tape image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Cas,
    Wav,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// Noise floor as a fraction of full scale (0.0–1.0).
    pub threshold:       f64,
    /// Cycles at or above this frequency decode to 1, below it to 0.
    pub frequency_limit: f64,
    pub parity:          WaveParity,
    /// First sample (WAV) or byte (CAS) considered part of the tape.
    pub start_sample:    u64,
    pub bit_order:       BitOrder,
    pub checksum:        ChecksumKind,
    /// Upper bound, in bits, for a single sync search.  `None` scans to the
    /// end of the stream.
    pub max_sync_scan:   Option<u64>,
    /// Forces a container kind instead of classifying by extension.
    pub container:       Option<ContainerKind>,
    /// Sample rate of synthesised WAV tapes.
    pub sample_rate:     u32,
    /// Sample width of synthesised WAV tapes (8 or 16).
    pub bits_per_sample: u16,
    /// Number of 0x55 bytes written before each leader-preceded block.
    pub leader_len:      usize,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            threshold:       0.0,
            frequency_limit: DEFAULT_FREQUENCY_LIMIT,
            parity:          WaveParity::Auto,
            start_sample:    0,
            bit_order:       BitOrder::LsbFirst,
            checksum:        ChecksumKind::Sum,
            max_sync_scan:   None,
            container:       None,
            sample_rate:     DEFAULT_SAMPLE_RATE,
            bits_per_sample: 16,
            leader_len:      DEFAULT_LEADER_LEN,
        }
    }
}

impl TapeConfig {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Cycle length in samples that separates a 1 bit from a 0 bit.
    pub fn cycle_cutoff(&self, sample_rate: u32) -> f64 {
        f64::from(sample_rate) / self.frequency_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_sum_wraps() {
        assert_eq!(ChecksumKind::Sum.compute(0x01, &[0x01, 0x02, 0x03, 0x04]), 0x0F);
        assert_eq!(ChecksumKind::Sum.compute(0xFF, &[0x02]), 0x02);
    }

    #[test]
    fn checksum_xor() {
        assert_eq!(ChecksumKind::Xor.compute(0x01, &[0x0F, 0xF0]), 0x01 ^ 0x02 ^ 0xFF);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = TapeConfig::from_json(br#"{"threshold": 0.25, "parity": "even"}"#).unwrap();
        assert_eq!(cfg.threshold, 0.25);
        assert_eq!(cfg.parity, WaveParity::Even);
        assert_eq!(cfg.frequency_limit, DEFAULT_FREQUENCY_LIMIT);
        assert_eq!(cfg.bit_order, BitOrder::LsbFirst);
    }

    #[test]
    fn json_round_trip() {
        let cfg = TapeConfig {
            container: Some(ContainerKind::Wav),
            max_sync_scan: Some(4096),
            ..TapeConfig::default()
        };
        let back = TapeConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn bad_json_is_config_error() {
        let err = TapeConfig::from_json(b"{\"parity\": \"sideways\"}").unwrap_err();
        assert!(matches!(err, crate::TapeError::Config(_)));
    }
}
