//! watchd CLI
//!
//! Administrative and consumer front end for the watchd core: checks
//! configuration, provisions the watch set, and decodes captured records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watchd_core::{
    ChangeRecord, Config, Exclusions, LogFormat, Logger, LoggerConfig, PathCache, PolicyStore,
    Provisioner, TtyDrivers, RECORD_SIZE,
};

/// watchd - hook-driven file integrity monitoring
#[derive(Parser)]
#[command(name = "watchd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format (default: general.default_format from the config)
    #[arg(short, long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Hide timestamps
    #[arg(long, global = true)]
    no_timestamps: bool,

    /// Enable debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration file
    Validate,
    /// Provision the configured watch set and report it
    Policy {
        /// List every watched object
        #[arg(long)]
        list: bool,
    },
    /// Decode a file of fixed-size change records
    Decode {
        /// Record dump to read
        file: PathBuf,
        /// Rebuild full paths from the configured watch set
        #[arg(long)]
        resolve: bool,
        /// Also show records whose names match an exclusion rule
        #[arg(long)]
        all: bool,
    },
    /// Show version information
    Version,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

impl From<OutputFormat> for LogFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Pretty => LogFormat::Pretty,
            OutputFormat::Json => LogFormat::JsonLines,
            OutputFormat::Compact => LogFormat::Compact,
        }
    }
}

impl OutputFormat {
    fn from_config(name: &str) -> Self {
        match name {
            "json" => OutputFormat::Json,
            "compact" => OutputFormat::Compact,
            _ => OutputFormat::Pretty,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_tracing(debug_enabled(&cli, &config));

    match &cli.command {
        Commands::Version => Ok(()),
        Commands::Validate => validate(&cli, &config),
        Commands::Policy { list } => policy(&cli, &config, *list),
        Commands::Decode { file, resolve, all } => decode(&cli, &config, file, *resolve, *all),
    }
}

fn debug_enabled(cli: &Cli, config: &Config) -> bool {
    cli.verbose || config.general.verbose
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

fn output_format(cli: &Cli, config: &Config) -> OutputFormat {
    cli.format
        .unwrap_or_else(|| OutputFormat::from_config(&config.general.default_format))
}

fn provisioner_for(config: &Config) -> Result<Provisioner> {
    Provisioner::from_config(
        Arc::new(PolicyStore::new(config.policy.capacity)),
        Arc::new(PathCache::new()),
        &config.provisioning,
    )
    .context("invalid provisioning rules")
}

fn print_version() {
    println!("{} v{}", "watchd".cyan().bold(), watchd_core::VERSION);
    println!("Hook-driven file integrity monitoring");
    println!();
    println!("Core: {}", watchd_core::NAME);
}

fn validate(cli: &Cli, config: &Config) -> Result<()> {
    config.validate().context("configuration is invalid")?;
    Exclusions::from_config(&config.provisioning).context("invalid provisioning rules")?;

    match output_format(cli, config) {
        OutputFormat::Json => {
            let result = serde_json::json!({
                "valid": true,
                "policy_capacity": config.policy.capacity,
                "correlation_capacity": config.correlation.capacity,
                "channel_capacity": config.channel.capacity,
                "overflow": config.channel.overflow.to_string(),
                "directories": config.provisioning.directories,
                "files": config.provisioning.files,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Compact => {
            println!(
                "ok policy={} correlation={} channel={} overflow={}",
                config.policy.capacity,
                config.correlation.capacity,
                config.channel.capacity,
                config.channel.overflow
            );
        }
        OutputFormat::Pretty => {
            println!("{}", "Configuration is valid".green().bold());
            println!();
            println!("  {} {}", "policy capacity:".dimmed(), config.policy.capacity);
            println!("  {} {}", "correlation capacity:".dimmed(), config.correlation.capacity);
            println!("  {} {}", "channel capacity:".dimmed(), config.channel.capacity);
            println!("  {} {}", "overflow:".dimmed(), config.channel.overflow);
            println!(
                "  {} {} directories, {} files",
                "watch roots:".dimmed(),
                config.provisioning.directories.len(),
                config.provisioning.files.len()
            );
        }
    }
    Ok(())
}

fn policy(cli: &Cli, config: &Config, list: bool) -> Result<()> {
    config.validate().context("configuration is invalid")?;

    let provisioner = provisioner_for(config)?;
    let summary = provisioner
        .load(&config.provisioning)
        .context("failed to provision watch set")?;
    let store = provisioner.policy();
    let paths = provisioner.path_cache();

    match output_format(cli, config) {
        OutputFormat::Json => {
            let entries: Vec<_> = if list {
                store
                    .snapshot()
                    .into_iter()
                    .map(|(key, record)| {
                        serde_json::json!({
                            "key": key,
                            "size": record.file_size,
                            "path": paths.path_of(&key),
                        })
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let result = serde_json::json!({
                "summary": summary,
                "watched": store.len(),
                "capacity": store.capacity(),
                "entries": entries,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        format => {
            if format == OutputFormat::Pretty {
                println!("{}", "Watch set".cyan().bold());
                println!();
            }
            println!(
                "{} watched ({} directories, {} files) of {}; {} excluded, {} missing, {} unreadable",
                store.len(),
                summary.directories,
                summary.files,
                store.capacity(),
                summary.excluded,
                summary.missing,
                summary.errors
            );
            if list {
                for (key, record) in store.snapshot() {
                    let path = paths
                        .path_of(&key)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "?".to_string());
                    let size = record
                        .file_size
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {:<24} {:>10}  {}", key.to_string(), size, path);
                }
            }
        }
    }
    Ok(())
}

/// Counts from one decode pass
#[derive(Debug, Default, PartialEq, Eq)]
struct DecodeStats {
    shown: usize,
    filtered: usize,
    invalid: usize,
    trailing_bytes: usize,
}

fn decode(cli: &Cli, config: &Config, file: &Path, resolve: bool, all: bool) -> Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let provisioner = provisioner_for(config)?;
    if resolve {
        provisioner
            .load(&config.provisioning)
            .context("failed to provision watch set")?;
    }

    let logger = Logger::new(LoggerConfig {
        format: output_format(cli, config).into(),
        show_timestamps: !cli.no_timestamps,
        use_colors: !cli.no_color,
    })
    .with_tty_drivers(TtyDrivers::load());

    let mut stdout = io::stdout().lock();
    let stats = decode_records(&raw, &provisioner, &logger, resolve, all, &mut stdout)?;
    info!(
        shown = stats.shown,
        filtered = stats.filtered,
        invalid = stats.invalid,
        "decode finished"
    );
    Ok(())
}

/// Decode `raw` record by record, replaying each into the provisioner the
/// way a live consumer would, and log the ones that pass the name filter.
fn decode_records<W: Write>(
    raw: &[u8],
    provisioner: &Provisioner,
    logger: &Logger,
    resolve: bool,
    all: bool,
    out: &mut W,
) -> Result<DecodeStats> {
    let mut stats = DecodeStats::default();
    let chunks = raw.chunks_exact(RECORD_SIZE);
    stats.trailing_bytes = chunks.remainder().len();

    for (index, chunk) in chunks.enumerate() {
        let record = match ChangeRecord::from_bytes(chunk) {
            Ok(record) => record,
            Err(e) => {
                warn!(index, error = %e, "skipping undecodable record");
                stats.invalid += 1;
                continue;
            }
        };

        // Resolve before following so a DELETE still finds its parent chain
        let path = resolve.then(|| provisioner.path_cache().resolve(&record));
        if resolve {
            if let Err(e) = provisioner.follow(&record) {
                warn!(index, error = %e, "cannot follow record");
            }
        }

        let name = record.filename.to_string_lossy();
        if !all && provisioner.exclusions().excludes_name(&name) {
            stats.filtered += 1;
            continue;
        }

        logger.log(&record, path.as_deref(), out)?;
        stats.shown += 1;
    }

    if stats.trailing_bytes > 0 {
        warn!(bytes = stats.trailing_bytes, "ignoring trailing partial record");
    }
    Ok(stats)
}
