//! Recordshape CLI - Reshape key/value variable exports into wide records
//!
//! # Main Commands
//!
//! ```bash
//! recordshape run variables.csv -t out/              # Full pipeline, result in out/result
//! recordshape run variables.csv -t out/ -i           # ... and every intermediate stage
//! recordshape variables variables.csv                # Escalated variable types as JSON
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! recordshape dedup variables.csv                    # Show column deduplication
//! recordshape example-config                         # Print the default config
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use recordshape::{
    dedup_columns, discover_variables, filter_empty_records, import_file, run_pipeline,
    ConfigStore, ImportOptions, OutputFormat, PipelineConfig, RunOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Parser)]
#[command(name = "recordshape")]
#[command(about = "Discover JSON columns and reshape variable tables into records", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pipeline over a CSV file
    Run {
        /// Input CSV file (one row per variable event)
        input: PathBuf,

        /// Pipeline config file (defaults if absent)
        #[arg(short, long, env = "RECORDSHAPE_CONFIG")]
        config: Option<PathBuf>,

        /// Target directory for results and intermediates
        #[arg(short, long, env = "RECORDSHAPE_TARGET", default_value = "recordshape-out")]
        target: PathBuf,

        /// Persist the output of every stage under <target>/intermediate
        #[arg(short = 'i', long)]
        write_intermediate: bool,

        /// Save the config with discovered variables to this file
        #[arg(long)]
        write_config: Option<PathBuf>,

        /// Output format (overrides the config)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,
    },

    /// Print the escalated type of every variable
    Variables {
        /// Input CSV file
        input: PathBuf,

        /// Pipeline config file (defaults if absent)
        #[arg(short, long, env = "RECORDSHAPE_CONFIG")]
        config: Option<PathBuf>,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a CSV file and show how its columns are deduplicated
    Dedup {
        /// Input CSV file
        input: PathBuf,

        /// Pipeline config file (defaults if absent)
        #[arg(short, long, env = "RECORDSHAPE_CONFIG")]
        config: Option<PathBuf>,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,
    },

    /// Print the default pipeline config
    ExampleConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_json);

    let result = match cli.command {
        Commands::Run {
            input,
            config,
            target,
            write_intermediate,
            write_config,
            format,
            delimiter,
        } => {
            let options = RunOptions {
                target,
                write_intermediate,
                write_config,
                format: format.map(OutputFormat::from),
                delimiter,
            };
            cmd_run(&input, config.as_deref(), &options)
        }

        Commands::Variables {
            input,
            config,
            delimiter,
            output,
        } => cmd_variables(&input, config.as_deref(), delimiter, output.as_deref()),

        Commands::Dedup {
            input,
            config,
            delimiter,
        } => cmd_dedup(&input, config.as_deref(), delimiter),

        Commands::ExampleConfig => cmd_example_config(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Human-readable or JSON logs on stderr. `RUST_LOG` applies unless a
/// verbosity flag is given.
fn init_logging(verbose: u8, quiet: bool, json: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 && !quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(p) => ConfigStore::new(p).load_or_default()?,
        None => PipelineConfig::default(),
    })
}

fn cmd_run(
    input: &Path,
    config: Option<&Path>,
    options: &RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", input.display());
    let config = load_config(config)?;

    let outcome = run_pipeline(input, &config, options)?;

    eprintln!("   Run: {}", outcome.run_id);
    eprintln!("   Records: {}", outcome.rows);
    eprintln!("   Columns: {}", outcome.columns.len());
    eprintln!("   Discovered variables: {}", outcome.discovered_variables);
    if options.write_intermediate {
        eprintln!("   Intermediates: {}", outcome.intermediates);
    }
    eprintln!("💾 Result written to: {}", outcome.result_path.display());
    if let Some(path) = &options.write_config {
        eprintln!("💾 Config written to: {}", path.display());
    }
    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_variables(
    input: &Path,
    config: Option<&Path>,
    delimiter: Option<char>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("🔍 Scanning variables: {}", input.display());
    let config = load_config(config)?;

    let variables = discover_variables(input, &config, delimiter)?;
    eprintln!("   {} variables", variables.len());

    let json = serde_json::to_string_pretty(&variables)?;
    write_output(&json, output)
}

fn cmd_dedup(
    input: &Path,
    config: Option<&Path>,
    delimiter: Option<char>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Importing: {}", input.display());
    let config = load_config(config)?;

    let options = ImportOptions {
        delimiter,
        partitions: config.partitions,
    };
    let imported = import_file(input, &options)?;
    eprintln!("   Encoding: {}", imported.encoding);
    eprintln!("   Delimiter: '{}'", format_delimiter(imported.delimiter));
    eprintln!("   Raw columns: {}", imported.raw_headers.join(", "));

    let rows_before = imported.dataset.row_count();
    let dataset = dedup_columns(imported.dataset)?;
    let dataset = filter_empty_records(dataset, &config.columns.record_id)?;

    let columns: Vec<&str> = dataset.schema().names().collect();
    println!("{}", columns.join(", "));
    eprintln!(
        "✅ {} columns, {} of {} rows kept",
        columns.len(),
        dataset.row_count(),
        rows_before
    );
    Ok(())
}

fn cmd_example_config() -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&PipelineConfig::default())?;
    println!("{}", json);
    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
