//!
//! src/summary.rs
//!
//! Catalog aggregations over one snapshot of the two tables: totals,
//! song versions, artist rankings and the popularity/duration spread.
//! Artists named in the core list count as the catalog's own; everyone
//! else is a collaborator.
//!

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::errors::EtlError;
use crate::types::{ArtistRecord, TrackRecord};

/// Both datasets as read back from a store or an export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub tracks: Vec<TrackRecord>,
    pub artists: Vec<ArtistRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongStats {
    pub song: String,
    pub artist: Option<String>,
    pub versions: usize,
    pub max_popularity: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistStats {
    pub artist: String,
    pub tracks: usize,
    pub avg_popularity: Option<f64>,
    pub followers: Option<i64>,
    pub is_core: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub label: &'static str,
    pub tracks: usize,
}

/// Spread and gaps of one numeric column
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnStats {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: Option<f64>,
    pub nulls: usize,
}

impl ColumnStats {
    fn of<I: Iterator<Item = Option<i64>>>(values: I) -> Self {
        let mut stats = ColumnStats::default();
        let mut present = Vec::new();
        for v in values {
            match v {
                Some(v) => present.push(v),
                None => stats.nulls += 1,
            }
        }
        stats.min = present.iter().copied().min();
        stats.max = present.iter().copied().max();
        stats.mean = mean(present.iter().map(|v| *v as f64));
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    pub popularity: ColumnStats,
    pub duration_ms: ColumnStats,
    pub followers: ColumnStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSummary {
    pub total_tracks: usize,
    pub unique_songs: usize,
    pub distinct_artists: usize,
    /// tracks attributed to a core artist
    pub core_tracks: usize,
    pub collab_tracks: usize,
    /// distinct non-core artist names
    pub collaborators: usize,
    pub avg_popularity: Option<f64>,
    pub max_popularity: Option<i32>,
    pub avg_duration_min: Option<f64>,
    pub most_versioned_song: Option<String>,
    pub most_prolific_artist: Option<String>,
    pub top_songs: Vec<SongStats>,
    pub top_artists: Vec<ArtistStats>,
    pub popularity_buckets: Vec<Bucket>,
    /// popularity 60 and up
    pub high_popularity: usize,
    pub high_popularity_pct: Option<usize>,
    pub duration_buckets: Vec<Bucket>,
    /// between 2 (inclusive) and 4 minutes
    pub standard_length: usize,
    pub standard_length_pct: Option<usize>,
    pub data_quality: DataQuality,
}

const POPULARITY_LABELS: [&str; 5] = ["0-19", "20-39", "40-59", "60-79", "80-100"];
const DURATION_LABELS: [&str; 5] = ["<2 min", "2-3 min", "3-4 min", "4-5 min", "5+ min"];

const VERSION_MARKERS: [&str; 5] = [
    r"\s*\(.*?\)",
    r"(?i)- Japanese ver\.?",
    r"(?i)- Instrumental",
    r"(?i)- Remix",
    r"(?i)- \w+ Ver\.?",
];

fn version_markers() -> Result<&'static [Regex], EtlError> {
    static MARKERS: OnceLock<Result<Vec<Regex>, regex::Error>> = OnceLock::new();
    MARKERS
        .get_or_init(|| VERSION_MARKERS.iter().map(|p| Regex::new(p)).collect())
        .as_deref()
        .map_err(|e| EtlError::Parse(format!("version marker: {e}")))
}

/// Song title with version markers removed, so a remix and its original
/// group together
pub fn base_name(title: &str) -> Result<String, EtlError> {
    let mut name = title.to_string();
    for marker in version_markers()? {
        name = marker.replace_all(&name, "").into_owned();
    }
    Ok(name.trim().to_string())
}

fn popularity_bucket(popularity: i32) -> usize {
    match popularity {
        p if p < 20 => 0,
        p if p < 40 => 1,
        p if p < 60 => 2,
        p if p < 80 => 3,
        _ => 4,
    }
}

fn duration_bucket(minutes: f64) -> usize {
    match minutes {
        m if m < 2.0 => 0,
        m if m < 3.0 => 1,
        m if m < 4.0 => 2,
        m if m < 5.0 => 3,
        _ => 4,
    }
}

fn buckets(labels: [&'static str; 5], counts: [usize; 5]) -> Vec<Bucket> {
    labels.into_iter()
        .zip(counts)
        .map(|(label, tracks)| Bucket { label, tracks })
        .collect()
}

/// Whole percent, rounded down; None for an empty catalog
fn percent(part: usize, total: usize) -> Option<usize> {
    (part * 100).checked_div(total)
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0_usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[derive(Default)]
struct SongGroup {
    artist: Option<String>,
    versions: usize,
    max_popularity: Option<i32>,
}

#[derive(Default)]
struct ArtistGroup {
    tracks: usize,
    popularity: Vec<f64>,
}

impl CatalogSummary {

    /// Rankings hold at most `top_n` entries, ordered by count with ties
    /// broken by name.
    pub fn compute(snapshot: &CatalogSnapshot, top_n: usize, core_artists: &[String]) ->
        Result<Self, EtlError> {
        let tracks = &snapshot.tracks;
        let is_core = |name: &str| core_artists.iter().any(|c| c == name);

        let mut songs: BTreeMap<String, SongGroup> = BTreeMap::new();
        let mut artists: BTreeMap<&str, ArtistGroup> = BTreeMap::new();
        let mut pop_counts = [0_usize; 5];
        let mut dur_counts = [0_usize; 5];
        let mut high_popularity = 0;
        let mut standard_length = 0;
        let mut core_tracks = 0;

        for t in tracks {
            let song = base_name(t.track_name.as_deref().unwrap_or_default())?;
            let group = songs.entry(song).or_default();
            if group.versions == 0 {
                group.artist = t.artist_name.clone();
            }
            group.versions += 1;
            group.max_popularity = group.max_popularity.max(t.popularity);

            if let Some(name) = t.artist_name.as_deref() {
                if is_core(name) {
                    core_tracks += 1;
                }
                let group = artists.entry(name).or_default();
                group.tracks += 1;
                group.popularity.extend(t.popularity.map(f64::from));
            }

            if let Some(p) = t.popularity {
                pop_counts[popularity_bucket(p)] += 1;
                if p >= 60 {
                    high_popularity += 1;
                }
            }

            if let Some(ms) = t.duration_ms {
                let minutes = ms as f64 / 60_000.0;
                dur_counts[duration_bucket(minutes)] += 1;
                if (2.0..4.0).contains(&minutes) {
                    standard_length += 1;
                }
            }
        }

        let mut song_stats: Vec<SongStats> = songs.into_iter()
            .map(|(song, g)| SongStats {
                song,
                artist: g.artist,
                versions: g.versions,
                max_popularity: g.max_popularity,
            })
            .collect();
        // stable sort keeps name order within equal counts
        song_stats.sort_by(|a, b| b.versions.cmp(&a.versions));

        let mut artist_stats: Vec<ArtistStats> = artists.into_iter()
            .map(|(name, g)| ArtistStats {
                artist: name.to_string(),
                tracks: g.tracks,
                avg_popularity: mean(g.popularity.into_iter()),
                followers: snapshot.artists.iter()
                    .find(|a| a.artist_name.as_deref() == Some(name))
                    .and_then(|a| a.followers),
                is_core: is_core(name),
            })
            .collect();
        artist_stats.sort_by(|a, b| b.tracks.cmp(&a.tracks));
        let collaborators = artist_stats.iter().filter(|a| !a.is_core).count();

        let distinct_artists = tracks.iter()
            .map(|t| &t.artist_id)
            .collect::<HashSet<_>>()
            .len();

        Ok(Self {
            total_tracks: tracks.len(),
            unique_songs: song_stats.len(),
            distinct_artists,
            core_tracks,
            collab_tracks: tracks.len() - core_tracks,
            collaborators,
            avg_popularity: mean(tracks.iter().filter_map(|t| t.popularity).map(f64::from)),
            max_popularity: tracks.iter().filter_map(|t| t.popularity).max(),
            avg_duration_min: mean(tracks.iter()
                .filter_map(|t| t.duration_ms)
                .map(|ms| ms as f64 / 60_000.0)),
            most_versioned_song: song_stats.first().map(|s| s.song.clone()),
            most_prolific_artist: artist_stats.first().map(|a| a.artist.clone()),
            top_songs: song_stats.into_iter().take(top_n).collect(),
            top_artists: artist_stats.into_iter().take(top_n).collect(),
            popularity_buckets: buckets(POPULARITY_LABELS, pop_counts),
            high_popularity,
            high_popularity_pct: percent(high_popularity, tracks.len()),
            duration_buckets: buckets(DURATION_LABELS, dur_counts),
            standard_length,
            standard_length_pct: percent(standard_length, tracks.len()),
            data_quality: DataQuality {
                popularity: ColumnStats::of(tracks.iter().map(|t| t.popularity.map(i64::from))),
                duration_ms: ColumnStats::of(tracks.iter().map(|t| t.duration_ms)),
                followers: ColumnStats::of(snapshot.artists.iter().map(|a| a.followers)),
            },
        })
    }
}
