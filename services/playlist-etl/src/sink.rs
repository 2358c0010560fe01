//!
//! src/sink.rs
//!
//! Flat-file copies of the two tables. Files are written to a temp file
//! next to the target and renamed into place, so a reader never sees a
//! half-written export.
//!

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::cache::SnapshotLoader;
use crate::errors::EtlError;
use crate::persistent::{Persistent, TableRow};
use crate::summary::CatalogSnapshot;
use crate::types::{ArtistRecord, TrackRecord};

pub const TRACKS_FILE: &str = "tracks.csv";
pub const ARTISTS_FILE: &str = "artists.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub tracks: ExportedFile,
    pub artists: ExportedFile,
}

pub struct CsvExporter {
    root: PathBuf
}

impl CsvExporter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub async fn export(&self, store: &Persistent) -> Result<ExportReport, EtlError> {
        let tracks  = store.fetch_tracks().await?;
        let artists = store.fetch_artists().await?;

        let report = ExportReport {
            tracks: self.write_rows(TRACKS_FILE, &tracks)?,
            artists: self.write_rows(ARTISTS_FILE, &artists)?,
        };

        info!(
            dir = %self.root.display(),
            tracks = report.tracks.rows, artists = report.artists.rows,
            "export.csv"
        );
        Ok(report)
    }

    /// Header row always comes from the table's column list, so an empty
    /// table still exports a header.
    pub fn write_rows<R>(&self, file_name: &str, rows: &[R]) -> Result<ExportedFile, EtlError>
    where
        R: TableRow + Serialize,
    {
        fs::create_dir_all(&self.root).map_err(|e| EtlError::Export(
            format!("create dir {}: {e}", self.root.display())
        ))?;
        let path = self.root.join(file_name);

        let temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| EtlError::Export(
                format!("tempfile in {}: {e}", self.root.display())
            ))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(temp.as_file());
            writer.write_record(R::COLUMNS)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }

        temp.persist(&path).map_err(|e|
            EtlError::Export(format!("persist {}: {e}", path.display())))?;

        Ok(ExportedFile { path, rows: rows.len() })
    }
}

/// Reads a directory previously written by CsvExporter
pub struct CsvSource {
    root: PathBuf
}

impl CsvSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn read_rows<R: DeserializeOwned>(&self, file_name: &str) -> Result<Vec<R>, EtlError> {
        let path = self.root.join(file_name);
        let mut reader = csv::Reader::from_path(&path).map_err(|e| EtlError::Export(
            format!("open {}: {e}", path.display())
        ))?;

        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl SnapshotLoader for CsvSource {
    async fn load(&self) -> Result<CatalogSnapshot, EtlError> {
        let tracks: Vec<TrackRecord>   = self.read_rows(TRACKS_FILE)?;
        let artists: Vec<ArtistRecord> = self.read_rows(ARTISTS_FILE)?;
        Ok(CatalogSnapshot { tracks, artists })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{artist, track};

    async fn seeded_store() -> Persistent {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        db.upsert(&[artist("a1", "Alpha", Some(100)), artist("a2", "Beta", None)])
            .await.unwrap();
        db.upsert(&[
            track("t1", "One, Two", "a1", "Alpha", 40, 180_000),
            track("t2", "Three", "a2", "Beta", 90, 240_000),
        ]).await.unwrap();
        db
    }

    #[tokio::test]
    async fn export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_store().await;

        let report = CsvExporter::new(dir.path()).export(&db).await.unwrap();
        assert_eq!(report.tracks.rows, 2);
        assert_eq!(report.artists.rows, 2);

        let text = fs::read_to_string(&report.tracks.path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(TrackRecord::COLUMNS.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some("t1,\"One, Two\",Album,a1,Alpha,40,180000,2024-03-01T10:00:00,mix,pl-1")
        );

        let artists = fs::read_to_string(dir.path().join(ARTISTS_FILE)).unwrap();
        assert!(artists.lines().any(|l| l == "a2,Beta,,,"));
    }

    #[tokio::test]
    async fn empty_tables_still_get_headers() {
        let dir = tempfile::tempdir().unwrap();
        let db = Persistent::init("sqlite::memory:").await.unwrap();

        let report = CsvExporter::new(dir.path().join("nested")).export(&db).await.unwrap();
        assert_eq!(report.tracks.rows, 0);
        let text = fs::read_to_string(&report.artists.path).unwrap();
        assert_eq!(text.trim_end(), ArtistRecord::COLUMNS.join(","));
    }

    #[tokio::test]
    async fn exported_directory_loads_back_as_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_store().await;
        CsvExporter::new(dir.path()).export(&db).await.unwrap();

        let snapshot = CsvSource::new(dir.path()).load().await.unwrap();
        assert_eq!(snapshot.tracks, db.fetch_tracks().await.unwrap());
        assert_eq!(snapshot.artists.len(), 2);
        assert_eq!(snapshot.artists[0].followers, Some(100));
        assert_eq!(snapshot.artists[1].followers, None);
    }

    #[tokio::test]
    async fn missing_export_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvSource::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, EtlError::Export(_)));
    }
}
