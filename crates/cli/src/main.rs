//! Panel CLI
//!
//! `panelctl` checks panel manifests and replays command sequences against
//! an in-memory transport, printing every bus transaction.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use panel_runtime::{
    DeviceState, ManualClock, PanelDevice, PowerLog, QueueStats, RecordingTransport,
    TransportEvent,
};
use panelc::CompiledPanel;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "panelctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Panel command sequence tool - check manifests and replay sequences", long_about = None)]
struct Cli {
    /// Debug logging for the interpreter and command queue
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a panel manifest and print the sequence order
    Check {
        /// Panel manifest (TOML)
        manifest: PathBuf,
    },

    /// Replay a sequence against a recording transport
    Run {
        /// Panel manifest (TOML)
        manifest: PathBuf,

        /// Sequence to run
        sequence: String,

        /// Set a property before running (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, i64)>,

        /// Register contents returned by reads (repeatable)
        #[arg(long = "register", value_name = "ADDR=HEX", value_parser = parse_register)]
        registers: Vec<(u8, Vec<u8>)>,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check { manifest } => run_check(&manifest),
        Commands::Run {
            manifest,
            sequence,
            set,
            registers,
            json,
        } => run_replay(&manifest, &sequence, set, registers, json),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn init_logging(verbose: bool) {
    let directives: &[&str] = if verbose {
        &["panelctl=debug", "panel_runtime=debug", "panelc=debug"]
    } else {
        &["panelctl=info", "panel_runtime=info"]
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in directives {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "panelctl", &mut io::stdout());
}

fn load_panel(path: &Path) -> CompiledPanel {
    match panelc::compile_manifest_file(path) {
        Ok(panel) => panel,
        Err(e) => {
            eprintln!("Error: {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn run_check(path: &Path) {
    let panel = load_panel(path);
    println!(
        "{}: ok ({} sequences, {} packets, {} resources, {} map tables)",
        path.display(),
        panel.sequences.len(),
        panel.packets.len(),
        panel.resources.len(),
        panel.map_tables.len()
    );
    for (i, name) in panel.sequence_names().iter().enumerate() {
        println!("  {:>3}. {}", i + 1, name);
    }
}

// ============================================================================
//                                 REPLAY
// ============================================================================

#[derive(Debug, Serialize)]
struct PowerEntry {
    rail: String,
    action: String,
}

/// Everything a replay produced
#[derive(Debug, Serialize)]
struct Report {
    sequence: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    events: Vec<TransportEvent>,
    stats: QueueStats,
    /// Simulated sleep time
    delay_us: u64,
    power: Vec<PowerEntry>,
}

/// Run `sequence` on a fresh device built from `panel`
fn replay(
    panel: CompiledPanel,
    sequence: &str,
    set: Vec<(String, i64)>,
    registers: Vec<(u8, Vec<u8>)>,
) -> Result<Report, String> {
    let transport = registers
        .into_iter()
        .fold(RecordingTransport::new(), |t, (addr, data)| {
            t.with_register(addr, data)
        });
    let clock = ManualClock::new();
    let power = PowerLog::new();
    let state = DeviceState::from_panel(panel, transport)
        .map_err(|e| e.to_string())?
        .with_clock(clock.clone())
        .with_power(power.clone());
    let device = PanelDevice::new(state);

    for (name, value) in set {
        debug!(property = %name, value, "setting property");
        device.set_property(&name, value).map_err(|e| e.to_string())?;
    }

    let result = device.run_sequence(sequence);
    let state = device.into_state().map_err(|e| e.to_string())?;
    Ok(Report {
        sequence: sequence.to_string(),
        ok: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
        events: state.transport().events().to_vec(),
        stats: state.queue_stats(),
        delay_us: u64::try_from(clock.total_slept().as_micros()).unwrap_or(u64::MAX),
        power: power
            .actions()
            .into_iter()
            .map(|(rail, action)| PowerEntry {
                rail,
                action: action.to_string(),
            })
            .collect(),
    })
}

fn run_replay(
    path: &Path,
    sequence: &str,
    set: Vec<(String, i64)>,
    registers: Vec<(u8, Vec<u8>)>,
    json: bool,
) {
    let panel = load_panel(path);
    info!(manifest = %path.display(), sequence, "replaying");

    let report = match replay(panel, sequence, set, registers) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                process::exit(1);
            }
        }
    } else {
        for event in &report.events {
            println!("{}", render_event(event));
        }
        for entry in &report.power {
            println!("power  {} {}", entry.rail, entry.action);
        }
        println!(
            "-- {} writes in {} flushes, {} bytes, {}us delay",
            report.stats.pushes, report.stats.flushes, report.stats.bytes, report.delay_us
        );
    }

    if let Some(error) = &report.error {
        eprintln!("Error: sequence '{}' failed: {}", sequence, error);
        process::exit(1);
    }
}

fn render_event(event: &TransportEvent) -> String {
    match event {
        TransportEvent::Write {
            id,
            data,
            offset,
            block,
        } => format!(
            "write  id=0x{:02x} offset={} {}{}",
            id,
            offset,
            hex::encode(data),
            if *block { " [block]" } else { "" }
        ),
        TransportEvent::Table { entries, block } => {
            let mut text = format!(
                "table  {} entries{}",
                entries.len(),
                if *block { " [block]" } else { "" }
            );
            for entry in entries {
                text.push_str(&format!(
                    "\n       id=0x{:02x} offset={} {}",
                    entry.id,
                    entry.offset,
                    hex::encode(&entry.data)
                ));
            }
            text
        }
        TransportEvent::Read { addr, offset, len } => {
            format!("read   addr=0x{:02x} offset={} len={}", addr, offset, len)
        }
        TransportEvent::Vsync { timeout_ms } => format!("vsync  timeout={}ms", timeout_ms),
    }
}

// ============================================================================
//                            ARGUMENT PARSING
// ============================================================================

fn parse_int(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", text, e))?;
    Ok(if negative { -value } else { value })
}

/// `NAME=VALUE`, value decimal or 0x-prefixed hex
fn parse_assignment(arg: &str) -> Result<(String, i64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing property name in '{}'", arg));
    }
    Ok((name.to_string(), parse_int(value)?))
}

/// `ADDR=HEX`, e.g. `0x04=814050`
fn parse_register(arg: &str) -> Result<(u8, Vec<u8>), String> {
    let (addr, data) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ADDR=HEX, got '{}'", arg))?;
    let addr = parse_int(addr)?;
    let addr = u8::try_from(addr).map_err(|_| format!("register address {} out of range", addr))?;
    let data = hex::decode(data.trim()).map_err(|e| format!("invalid hex '{}': {}", data, e))?;
    Ok((addr, data))
}
