//!
//! src/persistent.rs
//!
//! Relational store for the two datasets. Rows are written with keyed
//! upserts: insert when the primary key is new, otherwise overwrite every
//! other column. One call is one transaction.
//!

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{error, info};

use crate::cache::SnapshotLoader;
use crate::errors::EtlError;
use crate::summary::CatalogSnapshot;
use crate::types::{ArtistId, ArtistRecord, PlaylistId, TrackId, TrackRecord};

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A record that maps onto one table row. COLUMNS lists every column,
/// key included, in the order bind_row binds them.
pub trait TableRow: Send + Sync {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str;
    const COLUMNS: &'static [&'static str];

    fn key(&self) -> &str;
    fn bind_row<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

impl TableRow for ArtistRecord {
    const TABLE: &'static str = "artists";
    const PRIMARY_KEY: &'static str = "artist_id";
    const COLUMNS: &'static [&'static str] = &[
        "artist_id", "artist_name", "genres", "followers", "artist_popularity",
    ];

    fn key(&self) -> &str {
        self.artist_id.as_str()
    }

    fn bind_row<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.artist_id.as_str())
            .bind(self.artist_name.as_deref())
            .bind(self.genres.as_deref())
            .bind(self.followers)
            .bind(self.artist_popularity)
    }
}

impl TableRow for TrackRecord {
    const TABLE: &'static str = "tracks";
    const PRIMARY_KEY: &'static str = "track_id";
    const COLUMNS: &'static [&'static str] = &[
        "track_id", "track_name", "album_name", "artist_id", "artist_name",
        "popularity", "duration_ms", "added_at", "playlist_name", "playlist_id",
    ];

    fn key(&self) -> &str {
        self.track_id.as_str()
    }

    fn bind_row<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.track_id.as_str())
            .bind(self.track_name.as_deref())
            .bind(self.album_name.as_deref())
            .bind(self.artist_id.as_str())
            .bind(self.artist_name.as_deref())
            .bind(self.popularity)
            .bind(self.duration_ms)
            .bind(self.added_at.as_deref())
            .bind(self.playlist_name.as_str())
            .bind(self.playlist_id.as_str())
    }
}

/// INSERT ... ON CONFLICT(pk) DO UPDATE SET every non-key column
pub fn upsert_sql<R: TableRow>() -> String {
    let placeholders: Vec<String> = (1..=R::COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect();
    let updates: Vec<String> = R::COLUMNS.iter()
        .filter(|c| **c != R::PRIMARY_KEY)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {table} ({columns}) VALUES ({values}) \
         ON CONFLICT({pk}) DO UPDATE SET {updates};",
        table = R::TABLE,
        columns = R::COLUMNS.join(", "),
        values = placeholders.join(", "),
        pk = R::PRIMARY_KEY,
        updates = updates.join(", "),
    )
}

/// Directory a file-backed sqlite url lives in, if any
fn db_parent_dir(database_url: &str) -> Option<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    PathBuf::from(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
}

pub struct Persistent {
    pool: Pool<Sqlite>
}

impl Persistent {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), EtlError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS artists (
              artist_id          TEXT PRIMARY KEY,
              artist_name        TEXT,
              genres             TEXT,
              followers          INTEGER CHECK (followers IS NULL OR followers >= 0),
              artist_popularity  INTEGER CHECK (
                  artist_popularity IS NULL OR artist_popularity BETWEEN 0 AND 100)
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tracks (
              track_id       TEXT PRIMARY KEY,
              track_name     TEXT,
              album_name     TEXT,
              artist_id      TEXT NOT NULL REFERENCES artists(artist_id),
              artist_name    TEXT,
              popularity     INTEGER CHECK (popularity IS NULL OR popularity BETWEEN 0 AND 100),
              duration_ms    INTEGER CHECK (duration_ms IS NULL OR duration_ms > 0),
              added_at       TEXT,
              playlist_name  TEXT NOT NULL,
              playlist_id    TEXT NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist_id);")
            .execute(pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_playlist ON tracks(playlist_id);")
            .execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, EtlError> {
        let is_memory = database_url.starts_with("sqlite::memory:");

        if let Some(dir) = db_parent_dir(database_url) {
            std::fs::create_dir_all(&dir).map_err(|e| EtlError::Storage(
                format!("create dir {}: {e}", dir.display())
            ))?;
        }

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // WAL is file-only; don't set it for in-memory
        if !is_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal)
                       .synchronous(SqliteSynchronous::Normal);
        }

        // an in-memory database lives exactly as long as its one connection
        let mut pool_opts = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {4});
        if is_memory {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        Self::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Writes all rows or none. Returns how many rows were written.
    pub async fn upsert<R: TableRow>(&self, rows: &[R]) -> Result<usize, EtlError> {
        if rows.is_empty() {
            info!(table = R::TABLE, "load.skip.empty");
            return Ok(0);
        }

        let sql = upsert_sql::<R>();
        let mut tx = self.pool.begin().await?;

        for (position, row) in rows.iter().enumerate() {
            if let Err(e) = row.bind_row(sqlx::query(&sql)).execute(&mut *tx).await {
                error!(
                    table = R::TABLE, key = %row.key(), position, error = %e,
                    "load.upsert.failed"
                );
                if let Err(rollback) = tx.rollback().await {
                    error!(table = R::TABLE, error = %rollback, "load.rollback.failed");
                }
                return Err(EtlError::Storage(format!(
                    "upsert into {} failed at row {position} ({}={}): {e}",
                    R::TABLE, R::PRIMARY_KEY, row.key()
                )));
            }
        }

        tx.commit().await?;
        info!(table = R::TABLE, rows = rows.len(), "load.upsert");
        Ok(rows.len())
    }

    pub async fn count<R: TableRow>(&self) -> Result<i64, EtlError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {};", R::TABLE))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Tracks whose artist row is missing; zero after a well-ordered load
    pub async fn count_orphan_tracks(&self) -> Result<i64, EtlError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
              FROM tracks t
              LEFT JOIN artists a ON a.artist_id = t.artist_id
             WHERE a.artist_id IS NULL;
            "
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn fetch_tracks(&self) -> Result<Vec<TrackRecord>, EtlError> {
        let rows = sqlx::query(
            r"
            SELECT track_id, track_name, album_name, artist_id, artist_name,
                   popularity, duration_ms, added_at, playlist_name, playlist_id
              FROM tracks
             ORDER BY rowid;
            "
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::track_from_row).collect()
    }

    pub async fn fetch_artists(&self) -> Result<Vec<ArtistRecord>, EtlError> {
        let rows = sqlx::query(
            r"
            SELECT artist_id, artist_name, genres, followers, artist_popularity
              FROM artists
             ORDER BY rowid;
            "
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::artist_from_row).collect()
    }

    fn track_from_row(r: &SqliteRow) -> Result<TrackRecord, EtlError> {
        Ok(TrackRecord {
            track_id: TrackId(r.try_get("track_id")?),
            track_name: r.try_get("track_name")?,
            album_name: r.try_get("album_name")?,
            artist_id: ArtistId(r.try_get("artist_id")?),
            artist_name: r.try_get("artist_name")?,
            popularity: r.try_get("popularity")?,
            duration_ms: r.try_get("duration_ms")?,
            added_at: r.try_get("added_at")?,
            playlist_name: r.try_get("playlist_name")?,
            playlist_id: PlaylistId(r.try_get("playlist_id")?),
        })
    }

    fn artist_from_row(r: &SqliteRow) -> Result<ArtistRecord, EtlError> {
        Ok(ArtistRecord {
            artist_id: ArtistId(r.try_get("artist_id")?),
            artist_name: r.try_get("artist_name")?,
            genres: r.try_get("genres")?,
            followers: r.try_get("followers")?,
            artist_popularity: r.try_get("artist_popularity")?,
        })
    }
}

#[async_trait]
impl SnapshotLoader for Persistent {
    async fn load(&self) -> Result<CatalogSnapshot, EtlError> {
        let tracks  = self.fetch_tracks().await?;
        let artists = self.fetch_artists().await?;
        Ok(CatalogSnapshot { tracks, artists })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::testing::{artist, track};

    async fn store() -> Persistent {
        Persistent::init("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn upsert_sql_overwrites_every_non_key_column() {
        let sql = upsert_sql::<ArtistRecord>();
        assert!(sql.starts_with(
            "INSERT INTO artists (artist_id, artist_name, genres, followers, artist_popularity) \
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ));
        assert!(sql.contains("ON CONFLICT(artist_id) DO UPDATE SET"));
        for column in ArtistRecord::COLUMNS.iter().filter(|c| **c != "artist_id") {
            assert!(sql.contains(&format!("{column} = excluded.{column}")), "{column}");
        }
        assert!(!sql.contains("artist_id = excluded.artist_id"));
    }

    #[test]
    fn sqlite_url_parent_directory() {
        assert_eq!(db_parent_dir("sqlite:./data/playlist.db"), Some(PathBuf::from("./data")));
        assert_eq!(db_parent_dir("sqlite://var/db/x.db?mode=rwc"), Some(PathBuf::from("var/db")));
        assert_eq!(db_parent_dir("sqlite::memory:"), None);
        assert_eq!(db_parent_dir("sqlite:plain.db"), None);
        assert_eq!(db_parent_dir("postgres://x"), None);
    }

    #[tokio::test]
    async fn empty_dataset_is_a_no_op() {
        let db = store().await;
        let written = db.upsert::<TrackRecord>(&[]).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let db = store().await;
        let artists = vec![artist("a1", "Alpha", Some(10)), artist("a2", "Beta", None)];

        assert_eq!(db.upsert(&artists).await.unwrap(), 2);
        let first = db.fetch_artists().await.unwrap();
        assert_eq!(db.upsert(&artists).await.unwrap(), 2);
        let second = db.fetch_artists().await.unwrap();

        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 2);
        assert_eq!(first, second);
        assert_eq!(second, artists);
    }

    #[tokio::test]
    async fn upsert_overwrites_non_key_columns_including_nulls() {
        let db = store().await;
        db.upsert(&[artist("a1", "Alpha", Some(10))]).await.unwrap();

        let renamed = artist("a1", "Alpha Prime", None);
        db.upsert(std::slice::from_ref(&renamed)).await.unwrap();

        let stored = db.fetch_artists().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], renamed);
        assert_eq!(stored[0].followers, None);
    }

    #[tokio::test]
    async fn rows_absent_from_a_later_run_are_kept() {
        let db = store().await;
        db.upsert(&[artist("a1", "Alpha", None), artist("a2", "Beta", None)]).await.unwrap();
        db.upsert(&[artist("a2", "Beta", Some(3))]).await.unwrap();
        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn two_artists_then_five_tracks_resolve() {
        let db = store().await;
        let artists = vec![artist("a1", "Alpha", Some(1)), artist("a2", "Beta", Some(2))];
        let tracks: Vec<TrackRecord> = (0..5)
            .map(|i| {
                let (id, name) = if i % 2 == 0 { ("a1", "Alpha") } else { ("a2", "Beta") };
                track(&format!("t{i}"), "Song", id, name, 50, 200_000)
            })
            .collect();

        db.upsert(&artists).await.unwrap();
        db.upsert(&tracks).await.unwrap();

        assert_eq!(db.count::<ArtistRecord>().await.unwrap(), 2);
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 5);
        assert_eq!(db.count_orphan_tracks().await.unwrap(), 0);

        let known: HashSet<ArtistId> = db.fetch_artists().await.unwrap()
            .into_iter().map(|a| a.artist_id).collect();
        assert!(db.fetch_tracks().await.unwrap().iter().all(|t| known.contains(&t.artist_id)));
    }

    #[tokio::test]
    async fn failed_row_rolls_back_the_whole_call() {
        let db = store().await;
        db.upsert(&[artist("a1", "Alpha", None)]).await.unwrap();

        let mut bad = track("t2", "Too Popular", "a1", "Alpha", 50, 1_000);
        bad.popularity = Some(150);
        let batch = vec![
            track("t1", "Fine", "a1", "Alpha", 50, 1_000),
            bad,
            track("t3", "Never Written", "a1", "Alpha", 50, 1_000),
        ];

        let err = db.upsert(&batch).await.unwrap_err();
        match err {
            EtlError::Storage(msg) => assert!(msg.contains("row 1") && msg.contains("t2")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tracks_before_their_artists_are_rejected() {
        let db = store().await;
        let err = db.upsert(&[track("t1", "Lonely", "ghost", "Ghost", 10, 1_000)]).await;
        assert!(matches!(err, Err(EtlError::Storage(_))));
        assert_eq!(db.count::<TrackRecord>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_loads_both_tables_in_insert_order() {
        let db = store().await;
        db.upsert(&[artist("a2", "Beta", None), artist("a1", "Alpha", Some(9))]).await.unwrap();
        db.upsert(&[
            track("t2", "Two", "a2", "Beta", 20, 2_000),
            track("t1", "One", "a1", "Alpha", 10, 1_000),
        ]).await.unwrap();

        let snapshot = db.load().await.unwrap();
        let ids: Vec<&str> = snapshot.tracks.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
        assert_eq!(snapshot.artists.len(), 2);
        assert_eq!(snapshot.tracks[1].added_at.as_deref(), Some("2024-03-01T10:00:00"));
    }
}
