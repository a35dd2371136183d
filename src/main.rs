use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use cd_catalog::app::import_use_case::{write_ndjson, ImportOptions, ImportUseCase, LoadMode};
use cd_catalog::config::Config;
use cd_catalog::domain::Cd;
use cd_catalog::infra::DiscogsClient;
use cd_catalog::observability;
use cd_catalog::pipeline::processing::enrich::{EnricherConfig, MetadataEnricher};
use cd_catalog::pipeline::processing::merge::SourcePriority;
use cd_catalog::pipeline::storage::queries::DEFAULT_FILTER_LIMIT;
use cd_catalog::pipeline::storage::{ArtistMatch, CdFilter, CdStore};

#[derive(Parser)]
#[command(name = "cd_catalog")]
#[command(about = "Import, enrich and catalog a personal CD collection")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (defaults to ./cd_catalog.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the configured one
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a spreadsheet or CSV file of CDs
    Import {
        file: PathBuf,
        /// Only validate the file; nothing is enriched or stored
        #[arg(long)]
        validate_only: bool,
        /// Look each record up on Discogs before storing
        #[arg(long)]
        enrich: bool,
        /// Write the records to the database
        #[arg(long)]
        db: bool,
        #[arg(long, value_enum, default_value_t = LoadMode::Upsert)]
        mode: LoadMode,
        /// Which side wins when merging enriched data
        #[arg(long, value_enum)]
        priority: Option<SourcePriority>,
        /// Also write the final records as NDJSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Search the collection (all criteria are combined)
    Search {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long, default_value_t = DEFAULT_FILTER_LIMIT)]
        limit: usize,
    },
    /// Show one CD by id
    Show { id: i64 },
    /// Delete a CD by id, or every CD by an artist
    Delete {
        #[arg(long, conflicts_with = "artist", required_unless_present = "artist")]
        id: Option<i64>,
        #[arg(long)]
        artist: Option<String>,
        /// Match the artist as a substring instead of exactly
        #[arg(long, requires = "artist")]
        partial: bool,
    },
    /// Count the CDs in the collection
    Count,
    /// Collection totals and the most represented artists
    Stats {
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Export every CD to a CSV file, in id order
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_discogs_token(std::env::var("DISCOGS_TOKEN").ok());
    let _guard = observability::init_logging(&config.logging);
    if let Err(e) = observability::init() {
        warn!("Metrics disabled: {}", e);
    }

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.database.path.clone());

    let result = match cli.command {
        Commands::Import {
            file,
            validate_only,
            enrich,
            db,
            mode,
            priority,
            output,
        } => {
            let options = ImportOptions {
                validate_only,
                mode,
                priority: priority.unwrap_or(config.enrich.source_priority),
            };
            run_import(&config, &db_path, &file, &options, enrich, db, output.as_deref()).await
        }
        Commands::Search {
            artist,
            title,
            year,
            genre,
            limit,
        } => {
            let store = CdStore::open_existing(&db_path)?;
            let filter = CdFilter {
                artist,
                title,
                year,
                genre,
                limit,
            };
            let cds = store.filter_cds(&filter)?;
            println!("🔍 {} CDs found", cds.len());
            for cd in &cds {
                print_cd(cd);
            }
            Ok(())
        }
        Commands::Show { id } => {
            let store = CdStore::open_existing(&db_path)?;
            match store.get_cd_by_id(id)? {
                Some(cd) => println!("{}", serde_json::to_string_pretty(&cd)?),
                None => println!("⚠️  No CD with id {}", id),
            }
            Ok(())
        }
        Commands::Delete {
            id,
            artist,
            partial,
        } => {
            let mut store = CdStore::open_existing(&db_path)?;
            if let Some(id) = id {
                if store.delete_cd(id)? {
                    println!("🗑️  Deleted CD {}", id);
                } else {
                    println!("⚠️  No CD with id {}", id);
                }
            } else if let Some(artist) = artist {
                let mode = if partial {
                    ArtistMatch::Partial
                } else {
                    ArtistMatch::Exact
                };
                let removed = store.bulk_delete_by_artist(&artist, mode)?;
                println!("🗑️  Deleted {} CDs by '{}'", removed, artist);
            }
            Ok(())
        }
        Commands::Count => {
            let store = CdStore::open_existing(&db_path)?;
            println!("💿 {} CDs in the collection", store.count_cds()?);
            Ok(())
        }
        Commands::Stats { top } => {
            let store = CdStore::open_existing(&db_path)?;
            let stats = store.collection_stats(top)?;
            println!("\n📊 Collection Statistics:");
            println!("   Total CDs: {}", stats.total);
            println!("   Total artists: {}", stats.artists);
            if !stats.top_artists.is_empty() {
                println!("   Top {} artists:", stats.top_artists.len());
                for (artist, count) in &stats.top_artists {
                    println!("   - {}: {} CD(s)", artist, count);
                }
            }
            Ok(())
        }
        Commands::Export { path } => {
            let store = CdStore::open_existing(&db_path)?;
            match store.export_csv(&path)? {
                0 => println!("⚠️  No rows to export"),
                n => println!("📤 Exported {} rows to {}", n, path.display()),
            }
            Ok(())
        }
    };

    if let (Some(path), Some(snapshot)) = (&config.metrics.snapshot_path, observability::render()) {
        if let Err(e) = std::fs::write(path, snapshot) {
            warn!("Failed to write metrics snapshot to {}: {}", path.display(), e);
        }
    }

    result
}

async fn run_import(
    config: &Config,
    db_path: &Path,
    file: &Path,
    options: &ImportOptions,
    enrich: bool,
    persist: bool,
    output: Option<&Path>,
) -> Result<()> {
    println!("📥 Importing {}...", file.display());

    let mut use_case = ImportUseCase::default();
    if enrich && !options.validate_only {
        let client = DiscogsClient::new(&config.discogs)?;
        use_case = use_case.with_enricher(MetadataEnricher::new(
            Arc::new(client),
            EnricherConfig::from_config(config),
        ));
    }
    if persist && !options.validate_only {
        info!("Using database {}", db_path.display());
        use_case = use_case.with_store(CdStore::open(db_path)?);
    }

    let report = use_case.run(file, options).await?;

    println!("\n📊 Import Results for {}:", report.file.display());
    println!("   Rows read: {}", report.imported);
    println!("   Valid: {}", report.valid);
    println!("   Invalid: {}", report.invalid.len());
    if let Some(stats) = &report.enrichment {
        println!(
            "   Enriched: {} matched, {} unmatched, {} failed",
            stats.matched, stats.unmatched, stats.failed
        );
    }
    if persist && !options.validate_only {
        println!(
            "   Stored: {} new, {} updated, {} failed",
            report.inserted, report.updated, report.store_failures
        );
    }

    if !report.invalid.is_empty() {
        println!("\n⚠️  Invalid records:");
        for invalid in &report.invalid {
            println!(
                "   - {}: {}",
                invalid.record.display_name(),
                invalid.reasons.join("; ")
            );
        }
    }

    if let Some(output) = output {
        write_ndjson(output, &report.records)?;
        println!("   Output file: {}", output.display());
    }

    let elapsed = report.finished_at - report.started_at;
    println!("\n✅ Done in {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    Ok(())
}

fn print_cd(cd: &Cd) {
    let year = cd.year.map(|y| format!(" ({})", y)).unwrap_or_default();
    let genre = cd
        .genre
        .as_deref()
        .map(|g| format!(" [{}]", g))
        .unwrap_or_default();
    println!("   #{} {} - {}{}{}", cd.id, cd.artist, cd.title, year, genre);
}
