//! Whole-tape block scanner.
//!
//! # How it works
//!
//! The scanner rewinds the tape and pulls blocks from the assembler until
//! the stream runs out.  Damaged blocks do not stop it: a checksum or
//! framing failure is logged against the block and the sync search simply
//! resumes.  Namefile blocks open a new catalog record; the data and EOF
//! blocks that follow are credited to it.
//!
//! ## Block health
//!
//! | Health             | Meaning                                         |
//! |--------------------|-------------------------------------------------|
//! | `Healthy`          | checksum and trailer good                       |
//! | `ChecksumMismatch` | payload read, checksum disagrees                |
//! | `Framing`          | bad trailer byte, or no sync within the bound   |
//! | `MalformedEntry`   | namefile block whose payload cannot be decoded  |
//! | `Truncated`        | stream ends inside the block                    |
//!
//! ## Quality
//!
//! `Full` when every block is healthy, `Partial` when at least half are,
//! `Catastrophic` below that, and `Empty` when no block was found at all.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::assembler::BlockAssembler;
use crate::bitstream::BitSource;
use crate::block::BlockType;
use crate::config::TapeConfig;
use crate::dir_entry::DirEntry;
use crate::error::{Result, TapeError};
use crate::tape::{AccessMode, TapeFile};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockHealth {
    Healthy,
    ChecksumMismatch { expected: u8, actual: u8 },
    Framing { reason: String },
    MalformedEntry { reason: String },
    Truncated { reason: String },
}

impl BlockHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }
}

/// Diagnostic record for one block position on the tape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedBlock {
    /// Stream position just after the block's sync marker, when one was found.
    pub sync_position: Option<u64>,
    /// Block type code, when the header was read.
    pub block_type:    Option<u8>,
    pub length:        Option<u8>,
    pub health:        BlockHealth,
}

/// One file as reconstructed from the block sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// `None` for data found before any namefile block.
    pub entry:          Option<DirEntry>,
    pub data_blocks:    usize,
    pub data_bytes:     u64,
    pub damaged_blocks: usize,
    /// An EOF block closed the file.
    pub complete:       bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapeQuality {
    Full,
    Partial,
    Catastrophic,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub total_blocks:     usize,
    pub healthy_blocks:   usize,
    pub damaged_blocks:   usize,
    /// The stream ended inside a block.
    pub truncated:        bool,
    pub block_log:        Vec<ScannedBlock>,
    pub catalog:          Vec<CatalogRecord>,
    pub quality:          TapeQuality,
}

impl ScanReport {
    /// Percentage of blocks that are healthy (0.0–100.0).
    pub fn health_pct(&self) -> f64 {
        if self.total_blocks == 0 { return 100.0; }
        self.healthy_blocks as f64 / self.total_blocks as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        let complete = self.catalog.iter().filter(|r| r.complete).count();
        format!(
            "{:?} tape: {}/{} blocks healthy ({:.1}%), {} file(s) found, {} complete{}",
            self.quality,
            self.healthy_blocks,
            self.total_blocks,
            self.health_pct(),
            self.catalog.len(),
            complete,
            if self.truncated { ", stream truncated" } else { "" },
        )
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

fn current(catalog: &mut Vec<CatalogRecord>) -> &mut CatalogRecord {
    if catalog.is_empty() {
        catalog.push(CatalogRecord::default());
    }
    let last = catalog.len() - 1;
    &mut catalog[last]
}

/// Rewinds `assembler` and grades every block on the tape.
///
/// Corrupt data never makes this fail; it is recorded in the report.  Only
/// I/O and container errors propagate.
pub fn scan<S: BitSource>(assembler: &mut BlockAssembler<S>) -> Result<ScanReport> {
    assembler.rewind()?;

    let mut block_log: Vec<ScannedBlock> = Vec::new();
    let mut catalog:   Vec<CatalogRecord> = Vec::new();
    let mut truncated = false;

    loop {
        let sync_before = assembler.last_sync();
        let result = assembler.next_block();
        // A new sync position means the failure happened inside a block.
        let after = assembler.last_sync();
        let sync_position = if after != sync_before { after } else { None };

        let scanned = match result {
            Ok(None) => break,
            Ok(Some(block)) => {
                let mut health = BlockHealth::Healthy;
                match block.block_type {
                    BlockType::Namefile => match DirEntry::from_payload(&block.payload) {
                        Ok(entry) => catalog.push(CatalogRecord { entry: Some(entry), ..Default::default() }),
                        Err(e) => {
                            warn!("unreadable namefile block: {}", e);
                            health = BlockHealth::MalformedEntry { reason: e.to_string() };
                            catalog.push(CatalogRecord { damaged_blocks: 1, ..Default::default() });
                        }
                    },
                    BlockType::Data => {
                        let rec = current(&mut catalog);
                        rec.data_blocks += 1;
                        rec.data_bytes += block.len() as u64;
                    }
                    BlockType::Eof => current(&mut catalog).complete = true,
                    BlockType::Other(code) => debug!("block of unknown type {:#04x}", code),
                }
                ScannedBlock {
                    sync_position,
                    block_type: Some(block.block_type.code()),
                    length: u8::try_from(block.len()).ok(),
                    health,
                }
            }
            Err(TapeError::ChecksumMismatch { block_type, expected, actual }) => {
                if block_type == BlockType::Namefile.code() {
                    // The blocks that follow belong to a file whose name is lost.
                    catalog.push(CatalogRecord { damaged_blocks: 1, ..Default::default() });
                } else {
                    current(&mut catalog).damaged_blocks += 1;
                }
                ScannedBlock {
                    sync_position,
                    block_type: Some(block_type),
                    length: None,
                    health: BlockHealth::ChecksumMismatch { expected, actual },
                }
            }
            Err(TapeError::Framing { reason, .. }) => {
                if sync_position.is_some() {
                    current(&mut catalog).damaged_blocks += 1;
                }
                ScannedBlock { sync_position, block_type: None, length: None, health: BlockHealth::Framing { reason } }
            }
            Err(TapeError::UnexpectedEof(reason)) => {
                truncated = true;
                if !catalog.is_empty() {
                    current(&mut catalog).damaged_blocks += 1;
                }
                block_log.push(ScannedBlock {
                    sync_position,
                    block_type: None,
                    length: None,
                    health: BlockHealth::Truncated { reason },
                });
                break;
            }
            Err(e) => return Err(e),
        };
        block_log.push(scanned);
    }

    let total_blocks   = block_log.len();
    let healthy_blocks = block_log.iter().filter(|b| b.health.is_usable()).count();
    let damaged_blocks = total_blocks - healthy_blocks;

    let quality = if total_blocks == 0 {
        TapeQuality::Empty
    } else if damaged_blocks == 0 {
        TapeQuality::Full
    } else if healthy_blocks * 2 >= total_blocks {
        TapeQuality::Partial
    } else {
        TapeQuality::Catastrophic
    };
    debug!("scan finished: {} blocks, {} damaged, {:?}", total_blocks, damaged_blocks, quality);

    Ok(ScanReport { total_blocks, healthy_blocks, damaged_blocks, truncated, block_log, catalog, quality })
}

/// Convenience: open the tape at `path` in raw mode and scan it.
pub fn scan_file(path: &Path, config: &TapeConfig) -> Result<ScanReport> {
    let pathlist = path
        .to_str()
        .ok_or_else(|| TapeError::InvalidFilename(path.display().to_string()))?;
    let mut tape = TapeFile::open_with(pathlist, AccessMode::Raw, config)?;
    tape.scan()
}
