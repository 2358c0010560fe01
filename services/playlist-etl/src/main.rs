//!
//! src/main.rs
//!
//! Entry point: loads config, starts logging and dispatches the command.
//! Every error reaches here, is logged, and ends the process non-zero.
//!

mod cache;
mod cli;
mod config;
mod errors;
mod fetch;
mod logging;
mod persistent;
mod pipeline;
mod sink;
mod summary;
mod transform;
mod types;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use crate::cache::{SnapshotCache, SnapshotLoader};
use crate::cli::{Cli, Command, Source};
use crate::config::{AppConfig, PlaylistConfig, SummaryConfig};
use crate::errors::EtlError;
use crate::fetch::SpotifyClient;
use crate::persistent::Persistent;
use crate::pipeline::Pipeline;
use crate::sink::{CsvExporter, CsvSource};
use crate::summary::CatalogSummary;
use crate::types::PlaylistId;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfgs = match config::load_config() {
        Ok(cfgs) => cfgs,
        Err(e) => {
            eprintln!("playlist-etl: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _logger = match logging::init_logging(&cfgs.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("playlist-etl: {e}");
            return ExitCode::FAILURE;
        }
    };

    match execute(cli.command.unwrap_or_default(), &cfgs).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "etl.failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command, cfgs: &AppConfig) -> Result<(), EtlError> {
    match command {
        Command::Run { playlist_id, playlist_name } => {
            let playlist = PlaylistConfig {
                id: playlist_id.map(PlaylistId).unwrap_or_else(|| cfgs.playlist.id.clone()),
                name: playlist_name.unwrap_or_else(|| cfgs.playlist.name.clone()),
            };
            let store = Persistent::init(&cfgs.persistence.db_url).await?;
            let mut spotify = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;

            let report = Pipeline::new(&store, playlist).run(&mut spotify).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::FindPlaylists { query, limit } => {
            let mut spotify = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
            let hits = spotify.search_playlists(&query, limit).await?;
            info!(query = %query, hits = hits.len(), "search.playlists");
            for hit in hits {
                println!("{}\t{}", hit.id, hit.name);
            }
        }

        Command::Export { out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| PathBuf::from(&cfgs.persistence.export_dir));
            let store = Persistent::init(&cfgs.persistence.db_url).await?;
            let report = CsvExporter::new(&out_dir).export(&store).await?;
            println!("{} ({} rows)", report.tracks.path.display(), report.tracks.rows);
            println!("{} ({} rows)", report.artists.path.display(), report.artists.rows);
        }

        Command::Summary { source, dir, top, watch } => {
            let settings = SummaryConfig {
                top_n: top.unwrap_or(cfgs.summary.top_n),
                ..cfgs.summary.clone()
            };
            let watch = watch.map(Duration::from_secs);
            match source {
                Source::Store => {
                    let store = Persistent::init(&cfgs.persistence.db_url).await?;
                    summarize(store, &settings, watch).await?;
                }
                Source::Csv => {
                    let dir = dir.unwrap_or_else(|| PathBuf::from(&cfgs.persistence.export_dir));
                    summarize(CsvSource::new(dir), &settings, watch).await?;
                }
            }
        }
    }
    Ok(())
}

/// Prints the summary once, or on every tick of `watch` until ctrl-c.
/// Ticks inside the cache TTL reuse the last snapshot.
async fn summarize<L: SnapshotLoader>(
    loader: L,
    settings: &SummaryConfig,
    watch: Option<Duration>,
) -> Result<(), EtlError> {
    let cache = SnapshotCache::new(loader, settings.cache_ttl);

    loop {
        let snapshot = cache.get().await?;
        let summary = CatalogSummary::compute(&snapshot, settings.top_n, &settings.core_artists)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);

        let Some(every) = watch else {
            return Ok(());
        };

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!(reason = "interrupt", "summary.stop");
                return Ok(());
            }
            () = tokio::time::sleep(every) => {}
        }
    }
}
