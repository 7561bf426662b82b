//! Block and directory assembler.
//!
//! Runs the framing state machine over any [`BitSource`]:
//!
//! | State          | Action                                                |
//! |----------------|-------------------------------------------------------|
//! | Seek-Sync      | slide bit by bit until `0x55 0x3C` is in the window   |
//! | Read-Header    | block type and length bytes                           |
//! | Read-Payload   | `length` bytes (0 is valid)                           |
//! | Verify         | checksum over type, length and payload                |
//! | Confirm-Trailer| the 0x55 trailer byte                                 |
//!
//! A checksum mismatch is reported before the trailer is consumed, so the
//! stream is left at the trailer and the next call simply resumes the sync
//! search.  No retry happens in here.

use tracing::{debug, trace, warn};

use crate::bitstream::BitSource;
use crate::block::{Block, BlockType, SYNC, TRAILER};
use crate::config::{BitOrder, ChecksumKind, TapeConfig};
use crate::dir_entry::DirEntry;
use crate::error::{Result, TapeError};

pub struct BlockAssembler<S: BitSource> {
    source:        S,
    bit_order:     BitOrder,
    checksum:      ChecksumKind,
    max_sync_scan: Option<u64>,
    /// Stream position just after the most recent sync marker.
    last_sync:     Option<u64>,
}

impl<S: BitSource> BlockAssembler<S> {
    pub fn new(source: S, config: &TapeConfig) -> Self {
        Self {
            source,
            bit_order:     config.bit_order,
            checksum:      config.checksum,
            max_sync_scan: config.max_sync_scan,
            last_sync:     None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn last_sync(&self) -> Option<u64> {
        self.last_sync
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.last_sync = None;
        self.source.rewind()
    }

    /// Sync marker as it appears in the bit stream, oldest bit highest.
    fn sync_pattern(&self) -> u16 {
        let mut pattern = 0u16;
        for byte in SYNC {
            for i in 0..8 {
                let shift = match self.bit_order {
                    BitOrder::MsbFirst => 7 - i,
                    BitOrder::LsbFirst => i,
                };
                pattern = (pattern << 1) | u16::from((byte >> shift) & 1);
            }
        }
        pattern
    }

    /// Consumes bits up to and including the next sync marker.
    ///
    /// Returns `Ok(false)` when the stream ends first, and a framing error
    /// once more than `max_sync_scan` bits have been examined.
    pub fn seek_sync(&mut self) -> Result<bool> {
        let pattern = self.sync_pattern();
        let mut window = 0u16;
        let mut scanned = 0u64;
        loop {
            let bit = match self.source.read_bit() {
                Ok(bit) => bit,
                Err(TapeError::UnexpectedEof(_)) => {
                    trace!("stream ended after {} bits without sync", scanned);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            window = (window << 1) | u16::from(bit);
            scanned += 1;
            if scanned >= 16 && window == pattern {
                let at = self.source.bit_position();
                trace!("sync found at {} after {} bits", at, scanned);
                self.last_sync = Some(at);
                return Ok(true);
            }
            if let Some(max) = self.max_sync_scan {
                if scanned >= max {
                    return Err(TapeError::Framing {
                        bit_position: self.source.bit_position(),
                        reason: format!("no sync marker within {max} bits"),
                    });
                }
            }
        }
    }

    fn read_frame_byte(&mut self, what: &str) -> Result<u8> {
        self.source.read_byte(self.bit_order).map_err(|e| match e {
            TapeError::UnexpectedEof(detail) => {
                TapeError::UnexpectedEof(format!("while reading {what}: {detail}"))
            }
            other => other,
        })
    }

    /// Next complete block, or `None` when the stream holds no further sync.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if !self.seek_sync()? {
            return Ok(None);
        }

        let type_code = self.read_frame_byte("block type")?;
        let length = self.read_frame_byte("block length")?;
        let mut payload = vec![0u8; usize::from(length)];
        for byte in payload.iter_mut() {
            *byte = self.read_frame_byte("block payload")?;
        }
        let stored = self.read_frame_byte("checksum")?;

        let block = Block::new(BlockType::from(type_code), payload);
        let computed = block.checksum(self.checksum);
        if computed != stored {
            warn!(
                "checksum mismatch in block type {:#04x} ({} bytes): computed {:#04x}, stored {:#04x}",
                type_code, length, computed, stored
            );
            return Err(TapeError::ChecksumMismatch { block_type: type_code, expected: computed, actual: stored });
        }

        match self.source.read_byte(self.bit_order) {
            Ok(TRAILER) => {}
            Ok(other) => {
                return Err(TapeError::Framing {
                    bit_position: self.source.bit_position(),
                    reason: format!("trailer is {other:#04x}, expected {TRAILER:#04x}"),
                });
            }
            Err(TapeError::UnexpectedEof(_)) => {
                debug!("stream ends where the trailer of block type {:#04x} belongs", type_code);
            }
            Err(e) => return Err(e),
        }

        trace!(
            "block type {:#04x}, {} bytes: {}",
            type_code,
            length,
            hex::encode(&block.payload)
        );
        Ok(Some(block))
    }

    /// Skips forward to the next namefile block and decodes it.
    pub fn next_dir_entry(&mut self) -> Result<Option<DirEntry>> {
        while let Some(block) = self.next_block()? {
            if block.block_type == BlockType::Namefile {
                let entry = DirEntry::from_payload(&block.payload)?;
                debug!("directory entry {:?} ({})", entry.name(), entry.file_type.name());
                return Ok(Some(entry));
            }
            trace!("skipping {:?} block while looking for a namefile", block.block_type);
        }
        Ok(None)
    }
}
