//! Damage assessment for whole tapes.

pub mod scanner;

pub use scanner::{scan, scan_file, BlockHealth, CatalogRecord, ScanReport, ScannedBlock, TapeQuality};
