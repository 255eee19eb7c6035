use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use popwatch::common::config::{Config, config_file};
use popwatch::common::log;
use popwatch::sim::{Script, SimReport};
use popwatch::supervisor::record::{self, Record, RecordedEvent};
use tracing::warn;

#[derive(Parser)]
#[command(version, about = "Keeps a popup window alive and recreates it when control is lost")]
struct Cli {
    /// Path to configuration file to use (overrides default).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log per-tick diagnostics.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration file without running anything.
    Validate,
    /// Print the effective configuration.
    PrintConfig,
    /// Write the default configuration to the config path.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Run a scripted popup scenario against the supervisor.
    Simulate {
        script: PathBuf,

        /// Record emitted events to the specified file path. Overwrites the
        /// file if it exists.
        #[arg(long)]
        record: Option<PathBuf>,

        /// Drive the watchdog from a real timer instead of stepping it.
        #[arg(long)]
        realtime: bool,
    },
    /// Print the events of a recording.
    Replay { file: PathBuf },
}

fn main() {
    sigpipe::reset();
    let opt = Cli::parse();
    log::init_logging(opt.debug);

    if let Err(err) = run(opt) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run(opt: Cli) -> anyhow::Result<()> {
    let config_path = opt.config.clone().unwrap_or_else(config_file);

    match opt.command {
        Commands::Validate => {
            let config = Config::read(&config_path)?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("Config validation passed");
            } else {
                for issue in issues {
                    eprintln!("{issue}");
                }
                process::exit(1);
            }
        }
        Commands::PrintConfig => {
            let config = load_config(&config_path, opt.debug)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!("{} already exists; pass --force to overwrite", config_path.display());
            }
            Config::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }
        Commands::Simulate {
            script,
            record,
            realtime,
        } => {
            let config = load_config(&config_path, opt.debug)?;
            let script = Script::read(&script)?;
            let record = record.as_deref().map(Record::create).transpose()?;
            let report = if realtime {
                simulate_realtime(&script, &config, record)?
            } else {
                script.run(&config, record)
            };
            print_report(&report);
            if !report.errors.is_empty() {
                process::exit(2);
            }
        }
        Commands::Replay { file } => {
            let (settings, events) = record::load(&file)?;
            println!(
                "poll_ms={} lost_after_ms={} target_origin={}",
                settings.poll_ms,
                settings.lost_after_ms,
                settings.target_origin.as_deref().unwrap_or("*")
            );
            for event in &events {
                println!("{}", replay_line(event));
            }
        }
    }
    Ok(())
}

fn load_config(path: &std::path::Path, debug: bool) -> anyhow::Result<Config> {
    let mut config = Config::read_or_default(path)?;
    config.supervisor.debug |= debug;
    for issue in config.validate() {
        warn!("{issue}");
    }
    Ok(config)
}

fn simulate_realtime(
    script: &Script,
    config: &Config,
    record: Option<Record>,
) -> anyhow::Result<SimReport> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || s.store(true, Ordering::SeqCst))?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    let local = tokio::task::LocalSet::new();
    Ok(runtime.block_on(local.run_until(script.run_realtime(config, record, stop))))
}

fn print_report(report: &SimReport) {
    for line in &report.events {
        println!("{line}");
    }
    for err in &report.errors {
        println!("error: {err}");
    }
    println!(
        "{} ticks, {} popups opened, last seen {}",
        report.ticks,
        report.windows_opened,
        report.final_state.last_seen_href.as_deref().unwrap_or("-")
    );
}

fn replay_line(event: &RecordedEvent) -> String {
    match event {
        RecordedEvent::Open { reason, state } => {
            format!("open reason={reason} at={}", state.last_good_at)
        }
        RecordedEvent::Closed {
            by_manager,
            exit_signaled,
            ..
        } => format!("closed by_manager={by_manager} exit_signaled={exit_signaled}"),
        RecordedEvent::Lost { lost_for_ms, state } => format!(
            "lost lost_for_ms={lost_for_ms} last_seen={}",
            state.last_seen_href.as_deref().unwrap_or("-")
        ),
        RecordedEvent::Recovered { state } => {
            format!("recovered name={}", state.name.as_deref().unwrap_or("-"))
        }
        RecordedEvent::Exit { reason, .. } => {
            format!("exit reason={}", reason.as_deref().unwrap_or("-"))
        }
    }
}
