//! Reading and writing Color Computer cassette tapes, stored either as raw
//! `.cas` bit streams or as `.wav` recordings of the audio signal.

pub mod error;
pub mod config;
pub mod block;
pub mod dir_entry;
pub mod bitstream;
pub mod wav;
pub mod assembler;
pub mod recovery;
pub mod tape;

pub use error::{Result, TapeError};
pub use config::{BitOrder, ChecksumKind, ContainerKind, TapeConfig, WaveParity};
pub use block::{Block, BlockType};
pub use dir_entry::{DataType, DirEntry, FileType};
pub use bitstream::{BitSource, ByteSink, CasBitReader, CasPosition, TapeSource};
pub use wav::WavFormat;
pub use assembler::BlockAssembler;
pub use recovery::{scan_file, ScanReport};
pub use tape::{AccessMode, CreateOptions, TapeFile, TapePath};
