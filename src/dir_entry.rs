use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::error::{Result, TapeError};

pub const FILENAME_LEN:  usize = 8;
/// Payload length of a namefile block.
pub const DIR_ENTRY_LEN: usize = 15;

const FLAG_SET:   u8 = 0xFF;
const FLAG_CLEAR: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Tokenised BASIC program.
    Program,
    /// BASIC data file.
    Data,
    MachineLanguage,
    /// Text editor source.
    Text,
}

impl FileType {
    pub fn code(self) -> u8 {
        match self {
            FileType::Program         => 0,
            FileType::Data            => 1,
            FileType::MachineLanguage => 2,
            FileType::Text            => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(FileType::Program),
            1 => Ok(FileType::Data),
            2 => Ok(FileType::MachineLanguage),
            3 => Ok(FileType::Text),
            other => Err(TapeError::MalformedEntry(format!("unknown file type {other:#04x}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Program         => "program",
            FileType::Data            => "data",
            FileType::MachineLanguage => "machine-language",
            FileType::Text            => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Binary,
    Ascii,
}

/// Catalog record for one file on the tape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Left justified, space filled.
    pub filename:        [u8; FILENAME_LEN],
    pub file_type:       FileType,
    pub data_type:       DataType,
    pub gap:             bool,
    pub ml_load_address: u16,
    pub ml_exec_address: u16,
}

impl DirEntry {
    pub fn new(name: &str, file_type: FileType, data_type: DataType, gap: bool) -> Result<Self> {
        Ok(Self {
            filename: pad_filename(name)?,
            file_type,
            data_type,
            gap,
            ml_load_address: 0,
            ml_exec_address: 0,
        })
    }

    /// Filename with the space padding stripped.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.filename).trim_end_matches(' ').to_string()
    }

    pub fn is_ascii(&self) -> bool {
        self.data_type == DataType::Ascii
    }

    /// Load and exec addresses; only machine-language files carry them.
    pub fn addresses(&self) -> Option<(u16, u16)> {
        (self.file_type == FileType::MachineLanguage)
            .then_some((self.ml_load_address, self.ml_exec_address))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.filename)?;
        writer.write_u8(self.file_type.code())?;
        writer.write_u8(if self.is_ascii() { FLAG_SET } else { FLAG_CLEAR })?;
        writer.write_u8(if self.gap { FLAG_SET } else { FLAG_CLEAR })?;
        writer.write_u16::<BigEndian>(self.ml_load_address)?;
        writer.write_u16::<BigEndian>(self.ml_exec_address)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut filename = [0u8; FILENAME_LEN];
        reader.read_exact(&mut filename)?;
        let file_type = FileType::from_code(reader.read_u8()?)?;
        // Any non-zero flag byte counts as set; real tapes are not always 0xFF.
        let data_type = if reader.read_u8()? != FLAG_CLEAR { DataType::Ascii } else { DataType::Binary };
        let gap = reader.read_u8()? != FLAG_CLEAR;
        let ml_load_address = reader.read_u16::<BigEndian>()?;
        let ml_exec_address = reader.read_u16::<BigEndian>()?;
        Ok(Self { filename, file_type, data_type, gap, ml_load_address, ml_exec_address })
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_LEN] {
        let mut out = [0u8; DIR_ENTRY_LEN];
        out[..FILENAME_LEN].copy_from_slice(&self.filename);
        out[8] = self.file_type.code();
        out[9] = if self.is_ascii() { FLAG_SET } else { FLAG_CLEAR };
        out[10] = if self.gap { FLAG_SET } else { FLAG_CLEAR };
        out[11..13].copy_from_slice(&self.ml_load_address.to_be_bytes());
        out[13..15].copy_from_slice(&self.ml_exec_address.to_be_bytes());
        out
    }

    /// Decodes a namefile payload.  Trailing bytes beyond the fifteenth are
    /// ignored.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < DIR_ENTRY_LEN {
            return Err(TapeError::MalformedEntry(format!(
                "namefile payload is {} bytes, need {DIR_ENTRY_LEN}",
                payload.len()
            )));
        }
        Self::read(&payload[..DIR_ENTRY_LEN])
    }

    pub fn matches(&self, requested: &[u8; FILENAME_LEN]) -> bool {
        &self.filename == requested
    }
}

/// Left-justifies `name` into an 8-byte space-filled field.
pub fn pad_filename(name: &str) -> Result<[u8; FILENAME_LEN]> {
    if name.is_empty() || name.len() > FILENAME_LEN || !name.is_ascii() {
        return Err(TapeError::InvalidFilename(name.to_string()));
    }
    let mut out = [b' '; FILENAME_LEN];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(out)
}
