//!
//! src/pipeline.rs
//!
//! One extract, normalize, enrich, load pass over a playlist. Steps run
//! strictly in order and the first error ends the run. Artists are
//! written before tracks so every stored track can resolve its artist.
//!

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PlaylistConfig;
use crate::errors::EtlError;
use crate::fetch::MusicApi;
use crate::persistent::Persistent;
use crate::transform::{enrich_artists, normalize_artists, normalize_tracks};
use crate::types::{ArtistRecord, PlaylistId, TrackRecord};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub playlist_id: PlaylistId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: usize,
    pub tracks: usize,
    pub artists: usize,
    pub unavailable_artists: usize,
    pub artists_written: usize,
    pub tracks_written: usize,
    /// table sizes after the load, rows from earlier runs included
    pub stored_tracks: i64,
    pub stored_artists: i64,
    pub orphan_tracks: i64,
}

pub struct Pipeline<'a> {
    store: &'a Persistent,
    playlist: PlaylistConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a Persistent, playlist: PlaylistConfig) -> Self {
        Self { store, playlist }
    }

    pub async fn run<A>(&self, api: &mut A) -> Result<RunReport, EtlError>
    where
        A: MusicApi + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "etl.run",
            %run_id,
            playlist = %self.playlist.id.as_str(),
        );
        self.run_steps(run_id, api).instrument(span).await
    }

    async fn run_steps<A>(&self, run_id: Uuid, api: &mut A) -> Result<RunReport, EtlError>
    where
        A: MusicApi + ?Sized,
    {
        let started_at = Utc::now();
        info!(name = %self.playlist.name, "etl.start");

        let entries = api.fetch_playlist_tracks(&self.playlist.id).await?;
        info!(entries = entries.len(), "etl.extract");

        let tracks  = normalize_tracks(&entries, &self.playlist.name, &self.playlist.id);
        let artists = normalize_artists(&tracks);
        let artists = enrich_artists(&artists, api).await?;
        let unavailable_artists = artists.iter().filter(|a| !a.is_enriched()).count();

        let artists_written = self.store.upsert(&artists).await?;
        let tracks_written  = self.store.upsert(&tracks).await?;
        info!(artists = artists_written, tracks = tracks_written, "etl.load");

        let stored_tracks  = self.store.count::<TrackRecord>().await?;
        let stored_artists = self.store.count::<ArtistRecord>().await?;
        let orphan_tracks  = self.store.count_orphan_tracks().await?;
        if orphan_tracks > 0 {
            warn!(orphan_tracks, "etl.verify.orphans");
        }

        let report = RunReport {
            run_id,
            playlist_id: self.playlist.id.clone(),
            started_at,
            finished_at: Utc::now(),
            entries: entries.len(),
            tracks: tracks.len(),
            artists: artists.len(),
            unavailable_artists,
            artists_written,
            tracks_written,
            stored_tracks,
            stored_artists,
            orphan_tracks,
        };
        info!(
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "etl.finish"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, removed_entry, FakeApi};

    fn playlist() -> PlaylistConfig {
        PlaylistConfig { id: PlaylistId("pl-1".into()), name: "mix".into() }
    }

    #[tokio::test]
    async fn full_run_loads_both_tables() {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        let mut api = FakeApi::default()
            .with_playlist(vec![
                entry("t1", "a1", "Alpha", 50, 200_000),
                removed_entry(),
                entry("t2", "a2", "Beta", 70, 180_000),
                entry("t1", "a1", "Alpha", 50, 200_000),
                entry("t3", "a1", "Alpha", 30, 240_000),
            ])
            .with_artist("a1", &["k-pop"], 100, 60)
            .forbid("a2");

        let report = Pipeline::new(&db, playlist()).run(&mut api).await.unwrap();

        assert_eq!(report.entries, 5);
        assert_eq!((report.tracks, report.tracks_written), (3, 3));
        assert_eq!((report.artists, report.artists_written), (2, 2));
        assert_eq!(report.unavailable_artists, 1);
        assert_eq!((report.stored_tracks, report.stored_artists), (3, 2));
        assert_eq!(report.orphan_tracks, 0);
        assert!(report.finished_at >= report.started_at);

        assert_eq!(api.playlist_calls, 1);
        assert_eq!(api.artist_calls, vec!["a1", "a2"]);

        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 3);
        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 2);
        assert_eq!(db.count_orphan_tracks().await.unwrap(), 0);

        let artists = db.fetch_artists().await.unwrap();
        assert_eq!(artists[0].genres.as_deref(), Some("k-pop"));
        assert_eq!(artists[1].genres, None);
    }

    #[tokio::test]
    async fn rerun_keeps_row_counts() {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        let entries = vec![
            entry("t1", "a1", "Alpha", 50, 200_000),
            entry("t2", "a1", "Alpha", 55, 210_000),
        ];
        let mut api = FakeApi::default()
            .with_playlist(entries)
            .with_artist("a1", &["pop"], 10, 40);

        let pipeline = Pipeline::new(&db, playlist());
        let first = pipeline.run(&mut api).await.unwrap();
        let second = pipeline.run(&mut api).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.tracks_written, 2);
        assert_eq!((second.stored_tracks, second.stored_artists), (2, 1));
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 2);
        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enrichment_failure_writes_nothing() {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        let mut api = FakeApi::default()
            .with_playlist(vec![entry("t1", "a1", "Alpha", 50, 200_000)])
            .fail("a1", 503);

        let err = Pipeline::new(&db, playlist()).run(&mut api).await.unwrap_err();

        assert!(matches!(err, EtlError::Fetch { status: 503, .. }));
        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 0);
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_playlist_is_a_clean_run() {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        let mut api = FakeApi::default().with_playlist(vec![removed_entry()]);

        let report = Pipeline::new(&db, playlist()).run(&mut api).await.unwrap();
        assert_eq!((report.tracks_written, report.artists_written), (0, 0));
        assert!(api.artist_calls.is_empty());
    }
}
