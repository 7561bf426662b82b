use byteorder::WriteBytesExt;
use std::io::{self, Write};

use crate::config::ChecksumKind;

/// Leader byte; also the first sync byte and the block trailer.
pub const LEADER_BYTE: u8 = 0x55;
pub const SYNC_BYTE:   u8 = 0x3C;
pub const SYNC:        [u8; 2] = [LEADER_BYTE, SYNC_BYTE];
pub const TRAILER:     u8 = LEADER_BYTE;
/// Largest payload a single length byte can describe.
pub const MAX_PAYLOAD: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Namefile,
    Data,
    Eof,
    Other(u8),
}

impl BlockType {
    pub fn code(self) -> u8 {
        match self {
            BlockType::Namefile => 0x00,
            BlockType::Data     => 0x01,
            BlockType::Eof      => 0xFF,
            BlockType::Other(c) => c,
        }
    }
}

impl From<u8> for BlockType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => BlockType::Namefile,
            0x01 => BlockType::Data,
            0xFF => BlockType::Eof,
            c    => BlockType::Other(c),
        }
    }
}

/// One framed unit of tape data, sync and trailer stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub payload:    Vec<u8>,
}

impl Block {
    pub fn new(block_type: BlockType, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self { block_type, payload }
    }

    pub fn eof() -> Self {
        Self::new(BlockType::Eof, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn checksum(&self, kind: ChecksumKind) -> u8 {
        kind.compute(self.block_type.code(), &self.payload)
    }

    /// Writes sync, header, payload, checksum and trailer.
    pub fn write<W: Write>(&self, mut writer: W, kind: ChecksumKind) -> io::Result<()> {
        writer.write_all(&SYNC)?;
        writer.write_u8(self.block_type.code())?;
        writer.write_u8(self.payload.len() as u8)?;
        writer.write_all(&self.payload)?;
        writer.write_u8(self.checksum(kind))?;
        writer.write_u8(TRAILER)?;
        Ok(())
    }

    pub fn encode(&self, kind: ChecksumKind) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 6);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut out, kind);
        out
    }
}
