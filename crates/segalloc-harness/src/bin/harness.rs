//! CLI entrypoint for the segalloc trace harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use segalloc_core::{Allocator, AllocatorConfig, AllocatorLogLevel, StrategyKind};
use segalloc_harness::replay::{ReplayOptions, replay_with};
use segalloc_harness::structured_log::{LogEmitter, LogLevel};
use segalloc_harness::trace::{Pattern, Trace};

/// Trace tooling for segalloc.
#[derive(Debug, Parser)]
#[command(name = "segalloc-harness")]
#[command(about = "Replay and generate allocator workloads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay `.rep` traces and report utilization and throughput.
    Replay {
        /// Trace files to replay.
        #[arg(required = true)]
        traces: Vec<PathBuf>,
        /// JSON allocator config; environment variables apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the fit strategy (`first-fit`, `next-fit`, `best-fit`, `segregated`).
        #[arg(long)]
        strategy: Option<String>,
        /// Replay every trace once per strategy.
        #[arg(long)]
        all_strategies: bool,
        /// Disable the adaptive exact-fit cache.
        #[arg(long)]
        no_adaptive: bool,
        /// Skip per-op heap checks and payload re-reads.
        #[arg(long)]
        fast: bool,
        /// Write allocator lifecycle records as JSONL.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Lowest lifecycle level to record when `--log` is set.
        #[arg(long, default_value = "info")]
        log_level: String,
        /// Output JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a synthetic `.rep` trace.
    Generate {
        /// Workload shape (`random`, `binary`, `realloc`).
        #[arg(long, default_value = "random")]
        pattern: String,
        /// Approximate op count.
        #[arg(long, default_value_t = 4000)]
        ops: usize,
        /// Generator seed (decimal or 0x...).
        #[arg(long, default_value = "0x5EED")]
        seed: String,
        /// Output path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|e| format!("invalid seed '{raw}': {e}"))
}

fn load_config(path: Option<&Path>) -> Result<AllocatorConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<AllocatorConfig>(&text)?
        }
        None => AllocatorConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn write_output(output: Option<&Path>, body: &str) -> std::io::Result<()> {
    match output {
        Some(path) => std::fs::write(path, body),
        None => {
            println!("{body}");
            Ok(())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            traces,
            config,
            strategy,
            all_strategies,
            no_adaptive,
            fast,
            log,
            log_level,
            output,
        } => {
            let mut base = load_config(config.as_deref())?;
            if no_adaptive {
                base.adaptive = false;
            }
            if let Some(name) = strategy {
                base.strategy = StrategyKind::from_str_loose(&name)
                    .ok_or_else(|| format!("unknown strategy '{name}'"))?;
            }
            if log.is_some() {
                base.log_level = AllocatorLogLevel::from_str_loose(&log_level)
                    .ok_or_else(|| format!("unknown log level '{log_level}'"))?;
            }
            let kinds: Vec<StrategyKind> = if all_strategies {
                StrategyKind::ALL.to_vec()
            } else {
                vec![base.strategy]
            };
            let options = if fast {
                ReplayOptions::timing()
            } else {
                ReplayOptions::default()
            };
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, "replay")?),
                None => None,
            };

            let mut reports = Vec::new();
            for path in &traces {
                let trace = Trace::from_file(path)?;
                for &kind in &kinds {
                    let config = AllocatorConfig {
                        strategy: kind,
                        ..base.clone()
                    };
                    let mut alloc = Allocator::new(config)?;
                    let result = replay_with(&trace, &mut alloc, options);
                    if let Some(emitter) = emitter.as_mut() {
                        let event = if result.is_ok() {
                            "replay_pass"
                        } else {
                            "replay_fail"
                        };
                        emitter.emit(LogLevel::Info, event)?;
                        emitter.emit_records(&alloc.drain_lifecycle_logs())?;
                    }
                    let report = result.map_err(|err| format!("{}: {kind}: {err}", path.display()))?;
                    eprintln!(
                        "{} [{kind}] util={:.1}% ops/s={:.0} heap={}",
                        path.display(),
                        report.utilization * 100.0,
                        report.ops_per_sec,
                        report.heap_bytes,
                    );
                    reports.push(serde_json::json!({
                        "trace": path.display().to_string(),
                        "report": report,
                    }));
                }
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.flush()?;
            }
            let body = serde_json::to_string_pretty(&reports)?;
            write_output(output.as_deref(), &body)?;
        }
        Command::Generate {
            pattern,
            ops,
            seed,
            output,
        } => {
            let pattern = Pattern::from_str_loose(&pattern)
                .ok_or_else(|| format!("unknown pattern '{pattern}'"))?;
            let seed = parse_seed(&seed)?;
            let trace = pattern.generate(seed, ops);
            eprintln!(
                "Generated {:?} trace: {} ops, {} ids, sha256={}",
                pattern,
                trace.ops.len(),
                trace.num_ids,
                trace.sha256()
            );
            match output {
                Some(path) => std::fs::write(path, trace.to_rep())?,
                None => print!("{}", trace.to_rep()),
            }
        }
    }

    Ok(())
}
