use cocotape::assembler::BlockAssembler;
use cocotape::bitstream::{BitSource, CasBitReader, CasPosition};
use cocotape::block::{Block, BlockType};
use cocotape::config::{BitOrder, ChecksumKind, TapeConfig, WaveParity};
use cocotape::dir_entry::{DataType, DirEntry, FileType};
use cocotape::wav::demod::WavDemodulator;
use cocotape::wav::synth::WaveWriter;
use cocotape::wav::WavFormat;
use cocotape::TapeError;
use proptest::prelude::*;
use std::io::Cursor;

fn file_type() -> impl Strategy<Value = FileType> {
    prop_oneof![
        Just(FileType::Program),
        Just(FileType::Data),
        Just(FileType::MachineLanguage),
        Just(FileType::Text),
    ]
}

fn dir_entry() -> impl Strategy<Value = DirEntry> {
    ("[A-Z][A-Z0-9]{0,7}", file_type(), any::<bool>(), any::<bool>(), any::<u16>(), any::<u16>()).prop_map(
        |(name, file_type, ascii, gap, load, exec)| {
            let data_type = if ascii { DataType::Ascii } else { DataType::Binary };
            let mut entry = DirEntry::new(&name, file_type, data_type, gap).unwrap();
            entry.ml_load_address = load;
            entry.ml_exec_address = exec;
            entry
        },
    )
}

fn cas_assembler(bytes: Vec<u8>) -> BlockAssembler<CasBitReader<Cursor<Vec<u8>>>> {
    let config = TapeConfig::default();
    let reader = CasBitReader::new(Cursor::new(bytes), config.bit_order, CasPosition::default()).unwrap();
    BlockAssembler::new(reader, &config)
}

fn framed(block: &Block) -> Vec<u8> {
    let mut bytes = vec![0x55; 8];
    bytes.extend(block.encode(ChecksumKind::Sum));
    bytes
}

proptest! {
    /// Directory entries survive a trip through a namefile block.
    #[test]
    fn dir_entry_round_trip(entry in dir_entry()) {
        let block = Block::new(BlockType::Namefile, entry.to_bytes().to_vec());
        let mut asm = cas_assembler(framed(&block));
        let decoded = asm.next_dir_entry().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, Some(entry));
    }

    /// Any payload length is accepted when intact.
    #[test]
    fn intact_block_verifies(payload in prop::collection::vec(any::<u8>(), 0..=255)) {
        let block = Block::new(BlockType::Data, payload);
        let mut asm = cas_assembler(framed(&block));
        prop_assert_eq!(asm.next_block().map_err(|e| TestCaseError::fail(e.to_string()))?, Some(block));
    }

    /// Flipping one payload bit always fails verification.
    #[test]
    fn single_bit_flip_is_detected(
        payload in prop::collection::vec(any::<u8>(), 1..=255),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let block = Block::new(BlockType::Data, payload);
        let mut bytes = framed(&block);
        let at = 8 + 4 + index.index(block.len());
        bytes[at] ^= 1 << bit;
        let mut asm = cas_assembler(bytes);
        let is_mismatch = matches!(asm.next_block(), Err(TapeError::ChecksumMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    /// Starting anywhere inside the first byte yields the remaining bits in
    /// stream order, across byte boundaries.
    #[test]
    fn bit_offsets_preserve_sequence(
        bytes in prop::collection::vec(any::<u8>(), 2..16),
        offset in 0u8..8,
        msb_first in any::<bool>(),
    ) {
        let order = if msb_first { BitOrder::MsbFirst } else { BitOrder::LsbFirst };
        let expected: Vec<bool> = bytes
            .iter()
            .flat_map(|b| (0..8).map(move |i| {
                let shift = if msb_first { 7 - i } else { i };
                (b >> shift) & 1 == 1
            }))
            .skip(usize::from(offset))
            .collect();

        let mut r = CasBitReader::new(Cursor::new(bytes), order, CasPosition::new(0, offset)).unwrap();
        let got: Vec<bool> = (0..expected.len()).map(|_| r.read_bit().unwrap()).collect();
        prop_assert_eq!(got, expected);
        prop_assert!(r.read_bit().is_err());
    }

    /// A synthesised two-tone waveform demodulates back to the same bits,
    /// whichever polarity it was written in.
    #[test]
    fn synthesised_bits_demodulate(
        bits in prop::collection::vec(any::<bool>(), 1..200),
        inverted in any::<bool>(),
        auto in any::<bool>(),
        rate in prop_oneof![Just(9600u32), Just(22_050u32), Just(44_100u32)],
        bits_per_sample in prop_oneof![Just(8u16), Just(16u16)],
    ) {
        let mut cur = Cursor::new(Vec::new());
        let mut w = WaveWriter::new(&mut cur, rate, bits_per_sample, inverted).unwrap();
        for &bit in &bits {
            w.write_bit(bit).unwrap();
        }
        w.close().unwrap();

        let parity = match (auto, inverted) {
            (true, _)      => WaveParity::Auto,
            (false, false) => WaveParity::Odd,
            (false, true)  => WaveParity::Even,
        };
        let config = TapeConfig { parity, ..TapeConfig::default() };
        let format = WavFormat::parse(&mut cur).unwrap();
        let mut d = WavDemodulator::new(cur, format, &config).unwrap();
        let got: Vec<bool> = (0..bits.len()).map(|_| d.read_bit().unwrap()).collect();
        prop_assert_eq!(got, bits);
    }
}
