//! tridrag – Three-finger drag for Linux multitouch devices.
//!
//! CLI entry point.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{ArgAction, Parser};
use log::{LevelFilter, Log, Metadata, Record};

use tridrag::manager::{GestureManager, list_touch_devices};

#[derive(Parser)]
#[command(name = "tridrag", version, about = "Three-finger drag for multitouch devices")]
struct Cli {
    /// Configuration file
    #[arg(default_value = "/etc/tridrag/tridrag.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// List multitouch devices and their USB ids, then exit
    #[arg(short, long)]
    list_devices: bool,

    /// Validate the configuration file and exit
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn log_level(&self, configured: &str) -> LevelFilter {
        match self.verbose {
            0 => configured.parse().unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Logs `tridrag*` targets to stderr and, optionally, a file.
struct TridragLogger {
    level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl TridragLogger {
    fn install(level: LevelFilter, log_file: Option<&str>) -> Result<(), log::SetLoggerError> {
        let file = log_file.and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .inspect_err(|e| eprintln!("Warning: logging to stderr only, cannot open '{path}': {e}"))
                .ok()
                .map(Mutex::new)
        });
        log::set_boxed_logger(Box::new(Self { level, file }))?;
        log::set_max_level(level);
        Ok(())
    }

    fn with_file(&self, f: impl FnOnce(&mut File)) {
        if let Some(file) = &self.file {
            let mut guard = file.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *guard);
        }
    }
}

impl Log for TridragLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("tridrag")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let line = format!(
            "[{}.{:03} {:<5} {}] {}\n",
            now.as_secs(),
            now.subsec_millis(),
            record.level(),
            record.target(),
            record.args()
        );
        eprint!("{line}");
        self.with_file(|f| {
            let _ = f.write_all(line.as_bytes());
        });
    }

    fn flush(&self) {
        self.with_file(|f| {
            let _ = f.flush();
        });
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_touch_devices();
    }

    // The logger needs the configured level, so the config is parsed first.
    let manager = match GestureManager::new(&cli.config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {e}\n\nRun `tridrag --list-devices` to find the USB id of your touchpad.");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("{}: OK", cli.config.display());
        for line in manager.describe_devices() {
            println!("  {line}");
        }
        return ExitCode::SUCCESS;
    }

    let config = manager.config();
    if let Err(e) = TridragLogger::install(cli.log_level(&config.log_level), config.log_file.as_deref()) {
        eprintln!("Error: cannot install logger: {e}");
        return ExitCode::FAILURE;
    }

    let running = manager.running_flag();
    if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::Relaxed)) {
        log::error!("Cannot install Ctrl-C handler: {e}");
        return ExitCode::FAILURE;
    }

    log::info!("Configuration: {}", cli.config.display());
    if manager.start() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
