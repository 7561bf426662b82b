use clap::{Parser, Subcommand, ValueEnum};
use cocotape::config::{ContainerKind, TapeConfig, WaveParity};
use cocotape::recovery::{BlockHealth, ScanReport};
use cocotape::{AccessMode, TapeFile};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cocotape", about = "Inspect Color Computer cassette images (.cas / .wav)")]
struct Cli {
    /// Log decoder activity (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON file with decoder settings; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Noise threshold as a fraction of full scale (WAV)
    #[arg(long, global = true)]
    threshold: Option<f64>,
    /// Cycle frequency separating 1 bits from 0 bits, in Hz (WAV)
    #[arg(long, global = true)]
    frequency: Option<f64>,
    #[arg(long, value_enum, global = true)]
    parity: Option<ParityArg>,
    /// First sample (WAV) or byte (CAS) to decode from
    #[arg(long, global = true)]
    start: Option<u64>,
    /// Treat the image as this container regardless of extension
    #[arg(long, value_enum, global = true)]
    container: Option<ContainerArg>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParityArg {
    Auto,
    Odd,
    Even,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContainerArg {
    Cas,
    Wav,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files on a tape
    Dir {
        tape: PathBuf,
    },
    /// Check every block and report damage
    Scan {
        tape: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show container details
    Info {
        tape: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;

    match &cli.command {

        // ── Dir ──────────────────────────────────────────────────────────────
        Commands::Dir { tape } => {
            let mut t = TapeFile::open_with(pathlist(tape)?, AccessMode::Read, &config)?;
            println!("Tape: {}", tape.display());
            println!("{:<8}  {:<15} {:<6} {:<3}  {:>6} {:>6}", "Name", "Type", "Data", "Gap", "Load", "Exec");
            loop {
                let entry = match t.read_next_dir_entry() {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) if e.is_recoverable() => {
                        eprintln!("  skipping damaged block: {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let (load, exec) = entry
                    .addresses()
                    .map(|(l, x)| (format!("{l:04X}"), format!("{x:04X}")))
                    .unwrap_or_else(|| ("-".into(), "-".into()));
                println!(
                    "{:<8}  {:<15} {:<6} {:<3}  {:>6} {:>6}",
                    entry.name(),
                    entry.file_type.name(),
                    if entry.is_ascii() { "ascii" } else { "binary" },
                    if entry.gap { "yes" } else { "no" },
                    load,
                    exec,
                );
            }
            t.close()?;
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { tape, json } => {
            let mut t = TapeFile::open_with(pathlist(tape)?, AccessMode::Raw, &config)?;
            let report = t.scan()?;
            t.close()?;
            if *json {
                println!("{}", String::from_utf8_lossy(&report.to_json()?));
            } else {
                print_report(&report);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { tape } => {
            let t = TapeFile::open_with(pathlist(tape)?, AccessMode::Raw, &config)?;
            let size = std::fs::metadata(tape)?.len();

            println!("── Cassette image ───────────────────────────────────────");
            println!("  Path           {}", tape.display());
            println!("  Container      {:?}", t.container());
            println!("  File size      {} B", size);
            if let Some(fmt) = t.wav_format() {
                println!("  Sample rate    {} Hz", fmt.sample_rate);
                println!("  Sample width   {} bits", fmt.bits_per_sample);
                println!("  Channels       {}", fmt.channels);
                println!("  Samples        {}", fmt.total_samples());
                println!("  Duration       {:.2} s", fmt.duration_secs());
                println!("  Data chunk     {} B at offset {}", fmt.data_len, fmt.data_start);
                println!("  Threshold      {}", config.threshold);
                println!("  Freq. limit    {} Hz", config.frequency_limit);
                println!("  Parity         {:?}", config.parity);
            }
            if let Some(pos) = t.cas_position() {
                println!("  Start          byte {} bit {}", pos.byte, pos.bit);
            }
            println!("  Bit order      {:?}", config.bit_order);
            println!("  Checksum       {:?}", config.checksum);
            t.close()?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn build_config(cli: &Cli) -> Result<TapeConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => TapeConfig::from_json(&std::fs::read(path)?)?,
        None       => TapeConfig::default(),
    };
    if let Some(t) = cli.threshold { config.threshold = t; }
    if let Some(f) = cli.frequency { config.frequency_limit = f; }
    if let Some(s) = cli.start     { config.start_sample = s; }
    if let Some(p) = cli.parity {
        config.parity = match p {
            ParityArg::Auto => WaveParity::Auto,
            ParityArg::Odd  => WaveParity::Odd,
            ParityArg::Even => WaveParity::Even,
        };
    }
    if let Some(c) = cli.container {
        config.container = Some(match c {
            ContainerArg::Cas => ContainerKind::Cas,
            ContainerArg::Wav => ContainerKind::Wav,
        });
    }
    Ok(config)
}

fn pathlist(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.to_str()
        .ok_or_else(|| format!("{} is not valid UTF-8", path.display()).into())
}

fn print_report(report: &ScanReport) {
    println!("{}", report.summary());
    for (i, b) in report.block_log.iter().enumerate() {
        if b.health == BlockHealth::Healthy {
            continue;
        }
        let at = b.sync_position.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let kind = b.block_type.map(|t| format!("{t:#04x}")).unwrap_or_else(|| "?".into());
        println!("  block {:>4} at {:>10}  type {:<4}  {:?}", i, at, kind, b.health);
    }
    for rec in &report.catalog {
        let name = rec.entry.as_ref().map(|e| e.name()).unwrap_or_else(|| "<no name>".into());
        println!(
            "  {:<9} {:>3} block(s) {:>6} B  {}{}",
            name,
            rec.data_blocks,
            rec.data_bytes,
            if rec.complete { "complete" } else { "incomplete" },
            if rec.damaged_blocks > 0 { format!(", {} damaged", rec.damaged_blocks) } else { String::new() },
        );
    }
}
