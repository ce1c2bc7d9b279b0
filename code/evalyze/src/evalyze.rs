/// `evalyze` -- Transform, aggregate and tabulate SSO evaluation artifacts
///
/// Run with --help for brief help.
///
/// Every command works on one configuration (protocol, test duration, user count) in one artifact
/// directory.  Artifacts of other configurations and unrelated files in the directory are left
/// alone.
///
/// Quirks
///
/// A slot is the Nth user to be redirected in a cycle, not a particular test user, and phase
/// durations are attributed to slots by counting.  When logins overlap, some durations land in a
/// neighbouring slot.  Per-slot tables and statistics should be read with that in mind; the
/// all-slots rows of `stats` are not affected.
///
/// Cycle numbers in tables are positions in the artifact order.  The capture side numbers
/// artifacts by counting existing files, so if artifacts have been deleted or archived in between
/// runs, cycle N in a table need not be the Nth cycle that was run.
mod aggregate;
mod archive;
mod format;
mod resource;
mod stats;
mod table;
mod transform;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use evalutils::{EvalConfig, Origin, Protocol, TestConfiguration, MAX_USERS};
use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Convert raw timing logs and resource records into their serialized form
    Transform(TransformCmdArgs),

    /// Build the timing and user-time aggregates and write them as json
    Aggregate(AggregateCmdArgs),

    /// Print one measurement per user and cycle
    Table(TableCmdArgs),

    /// Print summary statistics per user and for all users
    Stats(StatsCmdArgs),

    /// Print a resource metric per sample
    Resource(ResourceCmdArgs),

    /// Move the artifacts of a configuration into a new storage directory
    Archive(ArchiveCmdArgs),
}

#[derive(Args, Debug)]
pub struct TransformCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct AggregateCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Directory to write the aggregates to [default: the artifact directory]
    #[arg(long, short)]
    output: Option<String>,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct TableCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    input_args: AggregateInputArgs,

    /// The measurement to tabulate: a phase key (eg dispatch_time), total_login_time,
    /// login_start_time, login_finish_time or protected_resource
    #[arg(long, short)]
    key: String,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct StatsCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    input_args: AggregateInputArgs,

    /// Summarize the total login times instead of the phase durations
    #[arg(long, default_value_t = false)]
    user_time: bool,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ResourceCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Where the records were taken, sp or idp
    #[arg(long, value_parser = parse_origin)]
    origin: Origin,

    /// The monitored group, eg nginx or keycloak
    #[arg(long, short)]
    group: String,

    /// cpu, memory or io
    #[arg(long, short)]
    resource: String,

    /// The variable of the resource, eg total_cpu_time, anonymous_memory, read_bytes
    #[arg(long)]
    variable: String,

    /// The block device for io, as major:minor
    #[arg(long)]
    device: Option<String>,

    /// raw, total, delta or percentage (cpu only)
    #[arg(long, short, default_value = "raw")]
    method: String,

    /// Byte, KB, MB or GB (memory and io only)
    #[arg(long, short, default_value = "Byte")]
    unit: String,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ArchiveCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Print what would be moved without moving anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// The login protocol, saml or oidc
    #[arg(long, short, value_parser = parse_protocol)]
    protocol: Protocol,

    /// The test duration in seconds
    #[arg(long, short)]
    duration: u32,

    /// The number of simulated users
    #[arg(long, short = 'n', value_parser = clap::value_parser!(u32).range(1..=MAX_USERS as i64))]
    users: u32,

    /// Select the artifact directory [default: data-path from the config file, or $EVAL_ROOT]
    #[arg(long)]
    data_path: Option<String>,

    /// File containing JSON data with evaluation settings [default: none]
    #[arg(long)]
    config_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct AggregateInputArgs {
    /// Read a persisted aggregate instead of the cycle artifacts
    #[arg(long)]
    aggregate: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct PrintArgs {
    /// Select fields and format for the output, `--fmt=help` lists them
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Log progress and per-artifact information to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn parse_protocol(s: &str) -> Result<Protocol> {
    s.parse::<Protocol>()
}

fn parse_origin(s: &str) -> Result<Origin> {
    s.parse::<Origin>()
}

/// Everything a command needs to know about where and what to read.

pub struct Source {
    pub config: TestConfiguration,
    pub eval_config: EvalConfig,
    pub data_path: PathBuf,
}

fn main() {
    match evalyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn evalyze() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        // Syntax as for other tools in this family: space-separated keyword(value) components,
        // "evalyze" first.
        println!("evalyze version({})", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if match cli.command {
        Commands::Table(ref args) => format::maybe_help(&args.print_args.fmt, &table::fmt_help),
        Commands::Stats(ref args) => format::maybe_help(&args.print_args.fmt, &stats::fmt_help),
        Commands::Resource(ref args) => {
            format::maybe_help(&args.print_args.fmt, &resource::fmt_help)
        }
        _ => false,
    } {
        return Ok(());
    }

    let (source_args, meta_args) = match cli.command {
        Commands::Version => bail!("Unexpected"),
        Commands::Transform(ref args) => (&args.source_args, &args.meta_args),
        Commands::Aggregate(ref args) => (&args.source_args, &args.meta_args),
        Commands::Table(ref args) => (&args.source_args, &args.meta_args),
        Commands::Stats(ref args) => (&args.source_args, &args.meta_args),
        Commands::Resource(ref args) => (&args.source_args, &args.meta_args),
        Commands::Archive(ref args) => (&args.source_args, &args.meta_args),
    };

    init_logging(meta_args.verbose);
    let source = resolve_source(source_args)?;
    tracing::debug!(
        "{} in {} ({})",
        source.config,
        source.data_path.display(),
        if source.eval_config.name.is_empty() {
            "unnamed setup"
        } else {
            source.eval_config.name.as_str()
        }
    );

    let mut stdout = std::io::stdout();
    match cli.command {
        Commands::Version => bail!("Unexpected"),
        Commands::Transform(_) => transform::transform_artifacts(&source),
        Commands::Aggregate(ref args) => aggregate::write_aggregates(&source, &args.output),
        Commands::Table(ref args) => table::print_table(&mut stdout, &source, args),
        Commands::Stats(ref args) => stats::print_stats(&mut stdout, &source, args),
        Commands::Resource(ref args) => resource::print_resource(&mut stdout, &source, args),
        Commands::Archive(ref args) => archive::archive_artifacts(&source, args.dry_run),
    }
}

/// Logs go to stderr so that stdout stays machine-readable.  RUST_LOG overrides the default
/// filter.

fn init_logging(verbose: bool) {
    let default = if verbose {
        "evalyze=debug,evallog=debug"
    } else {
        "evalyze=info,evallog=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_source(source_args: &SourceArgs) -> Result<Source> {
    let config =
        TestConfiguration::new(source_args.protocol, source_args.duration, source_args.users)?;

    let eval_config = if let Some(ref filename) = source_args.config_file {
        evalutils::read_eval_config(filename)?
    } else {
        EvalConfig::default()
    };

    let data_path = resolve_data_path(
        &source_args.data_path,
        &eval_config,
        env::var("EVAL_ROOT").ok(),
    )?;

    Ok(Source {
        config,
        eval_config,
        data_path,
    })
}

/// --data-path, else the config file's data-path, else $EVAL_ROOT.

fn resolve_data_path(
    flag: &Option<String>,
    eval_config: &EvalConfig,
    env_root: Option<String>,
) -> Result<PathBuf> {
    let data_path = if flag.is_some() {
        flag.clone()
    } else if eval_config.data_path.is_some() {
        eval_config.data_path.clone()
    } else {
        env_root
    };
    match data_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => bail!("No artifact directory: set --data-path, data-path in the config file or EVAL_ROOT"),
    }
}

#[test]
fn test_resolve_data_path() {
    let mut conf = EvalConfig::default();
    let env_root = Some("/from/env".to_string());
    assert!(
        resolve_data_path(&Some("/from/flag".to_string()), &conf, env_root.clone()).unwrap()
            == PathBuf::from("/from/flag")
    );
    assert!(resolve_data_path(&None, &conf, env_root.clone()).unwrap() == PathBuf::from("/from/env"));
    conf.data_path = Some("/from/config".to_string());
    assert!(resolve_data_path(&None, &conf, env_root).unwrap() == PathBuf::from("/from/config"));
    conf.data_path = None;
    assert!(resolve_data_path(&None, &conf, None).is_err());
}

#[test]
fn test_cli_users_range() {
    assert!(Cli::try_parse_from(["evalyze", "transform", "-p", "oidc", "-d", "60", "-n", "0"]).is_err());
    assert!(Cli::try_parse_from(["evalyze", "transform", "-p", "oidc", "-d", "60", "-n", "1001"]).is_err());
    assert!(Cli::try_parse_from(["evalyze", "transform", "-p", "ws-fed", "-d", "60", "-n", "10"]).is_err());
    assert!(Cli::try_parse_from(["evalyze", "transform", "-p", "SAML", "-d", "60", "-n", "1000"]).is_ok());
}
