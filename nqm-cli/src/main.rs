use clap::{Args, Parser, Subcommand};
use nqm_core::{logging, CoreConfig};
use nqm_query::QueryDefaults;

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "nqm")]
#[command(about = "NQM compound query toolkit", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "NQM_LOG_LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical JSON of a query, defaults included
    Normalize(QueryArgs),
    /// Print the hex digest of a query
    Digest {
        #[command(flatten)]
        query: QueryArgs,
        /// Digest the time filter only
        #[arg(long, default_value_t = false)]
        time_only: bool,
    },
    /// Print the URL-safe compact form of a query
    Compress(QueryArgs),
    /// Print the canonical JSON of a compact query
    Decompress {
        /// Output of `nqm compress`
        compact: String,
    },
    /// Print the concrete time window of a query
    Resolve {
        #[command(flatten)]
        query: QueryArgs,
        /// Reference instant (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Show version information
    Version,
}

#[derive(Args)]
struct QueryArgs {
    /// JSON file holding the query, `-` for stdin
    #[arg(default_value = "-")]
    input: String,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = CoreConfig::from_env()?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init_tracing(Some(level))?;

    let defaults = QueryDefaults::from_config(&config)?;

    match cli.command {
        Commands::Normalize(args) => {
            let query = commands::load_query(&commands::read_input(&args.input)?, &defaults)?;
            println!("{}", commands::normalize(&query)?);
        }
        Commands::Digest { query, time_only } => {
            let query = commands::load_query(&commands::read_input(&query.input)?, &defaults)?;
            println!("{}", commands::digest(&query, time_only));
        }
        Commands::Compress(args) => {
            let query = commands::load_query(&commands::read_input(&args.input)?, &defaults)?;
            println!("{}", commands::compress(&query, &defaults));
        }
        Commands::Decompress { compact } => {
            println!("{}", commands::decompress(&compact, &defaults)?);
        }
        Commands::Resolve { query, at } => {
            let query = commands::load_query(&commands::read_input(&query.input)?, &defaults)?;
            let reference = commands::reference_time(at.as_deref())?;
            let range = commands::resolve(&query, &reference)?;
            commands::print_range(range.as_ref());
        }
        Commands::Version => {
            println!("nqm v{}", env!("CARGO_PKG_VERSION"));
            println!("compact format v{}", nqm_query::COMPACT_VERSION);
        }
    }

    Ok(())
}
