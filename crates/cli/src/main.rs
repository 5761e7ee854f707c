//! FreshMart CLI - Database migrations and catalog tools.
//!
//! # Usage
//!
//! ```bash
//! # Run shop database migrations
//! fm-cli migrate
//!
//! # Load categories, goods, SKUs and homepage banners from YAML
//! fm-cli catalog seed catalog.yaml
//!
//! # Delete a homepage banner
//! fm-cli catalog delete goods-banner 3
//!
//! # Rebuild the static homepage
//! fm-cli catalog regenerate-index
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `catalog seed` - Insert or update catalog content through the same path the shop uses
//! - `catalog delete` - Delete a category or homepage row by id
//! - `catalog regenerate-index` - Render `index.html` into the static directory

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "fm-cli")]
#[command(author, version, about = "FreshMart CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage catalog content
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Seed the catalog from a YAML file
    Seed {
        /// Path to the YAML file
        file: PathBuf,
    },
    /// Delete a category or homepage row
    Delete {
        /// Kind of row
        #[arg(value_enum)]
        kind: commands::catalog::CatalogKind,
        /// Row id
        id: i32,
    },
    /// Render the static homepage
    RegenerateIndex {
        /// Output directory (defaults to `STOREFRONT_STATIC_DIR`)
        #[arg(short, long)]
        static_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Catalog { action } => match action {
            CatalogAction::Seed { file } => commands::catalog::seed(&file).await?,
            CatalogAction::Delete { kind, id } => commands::catalog::delete(kind, id).await?,
            CatalogAction::RegenerateIndex { static_dir } => {
                commands::catalog::regenerate_index(static_dir).await?;
            }
        },
    }
    Ok(())
}
