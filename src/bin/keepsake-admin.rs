//! Keepsake Admin - offline checksum maintenance
//!
//! Usage:
//!   keepsake-admin backfill
//!   keepsake-admin duplicates [DIR] [--json]
//!
//! Run `backfill` while the server is stopped; it rewrites the digest index.
//!
//! Environment variables:
//!   UPLOAD_DIR - Permanent upload directory (default: data/uploads)
//!   TEMP_UPLOAD_DIR - Temporary upload directory (default: data/temp)
//!   STAGING_DIR - Staging directory (default: data/.staging)
//!   INDEX_PATH - Digest index file (default: data/checksums.json)

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keepsake_server::index::DigestIndex;
use keepsake_server::reconcile;
use keepsake_server::storage::ObjectStore;

#[derive(Parser, Debug)]
#[command(name = "keepsake-admin")]
#[command(about = "Checksum maintenance for Keepsake upload directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hash upload files missing from the index and add them as permanent entries
    Backfill {
        /// Permanent upload directory
        #[arg(long, env = "UPLOAD_DIR", default_value = "data/uploads")]
        upload_dir: PathBuf,

        /// Temporary upload directory
        #[arg(long, env = "TEMP_UPLOAD_DIR", default_value = "data/temp")]
        temp_dir: PathBuf,

        /// Staging directory
        #[arg(long, env = "STAGING_DIR", default_value = "data/.staging")]
        staging_dir: PathBuf,

        /// Digest index file
        #[arg(long, env = "INDEX_PATH", default_value = "data/checksums.json")]
        index_path: PathBuf,
    },

    /// List files in a directory that share the same SHA-256
    Duplicates {
        /// Directory to scan
        #[arg(env = "UPLOAD_DIR", default_value = "data/uploads")]
        dir: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,keepsake_server=info")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    // Parse arguments
    let args = Args::parse();

    match args.command {
        Command::Backfill {
            upload_dir,
            temp_dir,
            staging_dir,
            index_path,
        } => {
            let store = ObjectStore::new(upload_dir, temp_dir, staging_dir);
            store.init().await.context("Failed to prepare storage directories")?;

            let index = DigestIndex::open(&index_path)
                .await
                .with_context(|| format!("Failed to load index {}", index_path.display()))?;

            let report = reconcile::adopt_untracked(&index, &store)
                .await
                .context("Backfill failed")?;

            println!("Adopted {} file(s), index now holds {}", report.adopted, index.len());
            for group in &report.duplicates {
                println!(
                    "Duplicate files for checksum {}: {}",
                    group.digest,
                    group.files.join(", ")
                );
            }
        }

        Command::Duplicates { dir, json } => {
            let groups = reconcile::find_duplicates(&dir)
                .await
                .with_context(|| format!("Failed to scan {}", dir.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else if groups.is_empty() {
                println!("No duplicate files in {}", dir.display());
            } else {
                for group in &groups {
                    println!(
                        "Duplicate files for checksum {}: {}",
                        group.digest,
                        group.files.join(", ")
                    );
                }
            }
        }
    }

    Ok(())
}
