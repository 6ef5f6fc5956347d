//! carecache CLI - operate a tag-indexed cache from the terminal.
//!
//! # Commands
//!
//! - `carecache health` - Round-trip probe against the cache
//! - `carecache stats` - Entry and tag-set counts under the key prefix
//! - `carecache rules` - Print the default invalidation rule table
//! - `carecache invalidate <event-type>` - Dispatch an invalidation event
//! - `carecache smart <collection> <operation> <id>` - Smart invalidation
//! - `carecache tags <tag>` - List a tag's members and whether they are live
//! - `carecache prune <tag>` - Drop a tag's dangling members
//! - `carecache del-pattern <glob>` - Delete keys matching a glob
//! - `carecache clear --yes` - Flush the whole cache database

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

mod commands;
mod error;
mod output;

use commands::{Session, Target, inspect, invalidate, maintenance};
use error::{CliError, CliResult};

/// carecache - cache operations and manual invalidation
#[derive(Parser)]
#[command(name = "carecache")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Inspect and invalidate a tag-indexed Redis cache")]
#[command(propagate_version = true)]
#[command(after_help = format!(
    "{}\n  {} carecache health\n  {} carecache invalidate tenant.updated --entity-id t1\n  {} carecache smart user updated 42 --fields email,name\n  {} carecache del-pattern 'saas:report:*'",
    "Examples:".bright_cyan().bold(),
    "$".dimmed(),
    "$".dimmed(),
    "$".dimmed(),
    "$".dimmed(),
))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    target: TargetArgs,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log cache operations at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Redis URL
    #[arg(long, global = true, env = "CARECACHE_REDIS_URL")]
    redis_url: Option<String>,

    /// Key prefix
    #[arg(long, global = true, env = "CARECACHE_KEY_PREFIX")]
    prefix: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the cache answers
    Health,

    /// Show entry and tag-set counts
    Stats,

    /// Print the default invalidation rules
    Rules,

    /// Dispatch an invalidation event
    #[command(alias = "i")]
    Invalidate(InvalidateArgs),

    /// Invalidate after a write to a collection
    Smart(SmartArgs),

    /// List the members of a tag
    Tags {
        /// Tag name
        tag: String,
    },

    /// Remove a tag's members whose keys no longer exist
    Prune {
        /// Tag name
        tag: String,
    },

    /// Delete every key matching a glob
    DelPattern {
        /// Glob pattern, e.g. `saas:user:*`
        pattern: String,
    },

    /// Flush the entire cache database
    Clear {
        /// Confirm the flush
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct InvalidateArgs {
    /// Event type, e.g. `tenant.updated`
    event_type: String,

    /// Entity id for `{entityId}`
    #[arg(long)]
    entity_id: Option<String>,

    /// Entity type for `{entityType}`
    #[arg(long)]
    entity_type: Option<String>,

    /// Metadata entry for `{key}` placeholders (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = invalidate::parse_meta)]
    metadata: Vec<(String, String)>,
}

#[derive(Args)]
struct SmartArgs {
    /// Collection, e.g. `user`
    collection: String,

    /// Operation, e.g. `updated`
    operation: String,

    /// Document id
    document_id: String,

    /// Changed fields
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    carecache_log::init();
    if cli.verbose {
        carecache_log::set_level(carecache_log::Level::Debug);
    }

    let target = Target {
        redis_url: cli.target.redis_url,
        prefix: cli.target.prefix,
    };

    if let Err(e) = run(cli.command, &target, cli.json).await {
        eprintln!("\n  {} {}\n", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, target: &Target, json: bool) -> CliResult<()> {
    match command {
        Commands::Rules => inspect::rules(target, json),
        Commands::Clear { yes: false } => Err(CliError::InvalidArgument(
            "`clear` flushes every key for every tenant; pass --yes to confirm".to_string(),
        )),
        Commands::Clear { yes: true } => {
            maintenance::clear(&Session::open(target, json).await?).await
        }
        Commands::Health => inspect::health(&Session::open(target, json).await?).await,
        Commands::Stats => inspect::stats(&Session::open(target, json).await?).await,
        Commands::Invalidate(args) => {
            invalidate::event(
                &Session::open(target, json).await?,
                &args.event_type,
                args.entity_id,
                args.entity_type,
                args.metadata,
            )
            .await
        }
        Commands::Smart(args) => {
            invalidate::smart(
                &Session::open(target, json).await?,
                &args.collection,
                &args.operation,
                &args.document_id,
                &args.fields,
            )
            .await
        }
        Commands::Tags { tag } => inspect::tags(&Session::open(target, json).await?, &tag).await,
        Commands::Prune { tag } => {
            maintenance::prune(&Session::open(target, json).await?, &tag).await
        }
        Commands::DelPattern { pattern } => {
            maintenance::del_pattern(&Session::open(target, json).await?, &pattern).await
        }
    }
}
