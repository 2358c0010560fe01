//!
//! src/transform.rs
//!
//! Flattens raw playlist entries into the track and artist datasets and
//! fills artist metadata through the API client.
//!

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::errors::EtlError;
use crate::fetch::MusicApi;
use crate::types::{
    ArtistId, ArtistLookup, ArtistRecord, PlaylistId, PlaylistItem, TrackId, TrackRecord
};

/// Spotify timestamps end in 'Z'; only that marker is dropped, the rest
/// stays text
fn strip_utc_marker(added_at: &str) -> String {
    added_at.strip_suffix('Z').unwrap_or(added_at).to_string()
}

fn popularity_in_range(value: Option<i32>, field: &'static str, key: &str) -> Option<i32> {
    match value {
        Some(p) if !(0..=100).contains(&p) => {
            warn!(key, field, value = p, "transform.out_of_range");
            None
        }
        other => other,
    }
}

fn positive(value: Option<i64>, field: &'static str, key: &str) -> Option<i64> {
    match value {
        Some(v) if v <= 0 => {
            warn!(key, field, value = v, "transform.out_of_range");
            None
        }
        other => other,
    }
}

/// Builds one row per distinct track id, in first-seen order. Entries
/// without a track payload are dropped, as are tracks that lack an id
/// or a primary artist id.
pub fn normalize_tracks(
    entries: &[PlaylistItem],
    playlist_name: &str,
    playlist_id: &PlaylistId
) -> Vec<TrackRecord> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut rows = Vec::with_capacity(entries.len());
    let mut removed = 0_usize;

    for (position, entry) in entries.iter().enumerate() {
        let Some(track) = entry.track.as_ref() else {
            removed += 1;
            continue;
        };

        let Some(track_id) = track.id.as_deref() else {
            warn!(position, "transform.track.no_id");
            continue;
        };

        let artist = track.primary_artist();
        let Some(artist_id) = artist.and_then(|a| a.id.as_deref()) else {
            warn!(position, track = %track_id, "transform.track.no_artist");
            continue;
        };

        if !seen.insert(track_id) {
            debug!(track = %track_id, "transform.track.duplicate");
            continue;
        }

        rows.push(TrackRecord {
            track_id: TrackId(track_id.to_string()),
            track_name: track.name.clone(),
            album_name: track.album.as_ref().and_then(|a| a.name.clone()),
            artist_id: ArtistId(artist_id.to_string()),
            artist_name: artist.and_then(|a| a.name.clone()),
            popularity: popularity_in_range(track.popularity, "popularity", track_id),
            duration_ms: positive(track.duration_ms, "duration_ms", track_id),
            added_at: entry.added_at.as_deref().map(strip_utc_marker),
            playlist_name: playlist_name.to_string(),
            playlist_id: playlist_id.clone(),
        });
    }

    info!(
        entries = entries.len(), removed, tracks = rows.len(),
        "transform.tracks"
    );
    rows
}

/// Distinct artists referenced by the tracks, metadata left unset
pub fn normalize_artists(tracks: &[TrackRecord]) -> Vec<ArtistRecord> {
    let mut seen: HashSet<&ArtistId> = HashSet::new();
    let artists: Vec<ArtistRecord> = tracks.iter()
        .filter(|t| seen.insert(&t.artist_id))
        .map(|t| ArtistRecord::bare(t.artist_id.clone(), t.artist_name.clone()))
        .collect();

    info!(artists = artists.len(), "transform.artists");
    artists
}

/// Looks up every artist in order. A forbidden lookup leaves that row's
/// metadata null; any other failure aborts the pass.
pub async fn enrich_artists<A>(artists: &[ArtistRecord], api: &mut A) ->
    Result<Vec<ArtistRecord>, EtlError>
where
    A: MusicApi + ?Sized,
{
    let mut enriched = Vec::with_capacity(artists.len());
    let mut unavailable = 0_usize;

    for artist in artists {
        let row = match api.fetch_artist(&artist.artist_id).await? {
            ArtistLookup::Found(details) => ArtistRecord {
                artist_id: artist.artist_id.clone(),
                artist_name: artist.artist_name.clone(),
                genres: Some(details.genres.join(", ")),
                followers: details.followers.and_then(|f| f.total)
                    .filter(|f| *f >= 0),
                artist_popularity: popularity_in_range(
                    details.popularity, "artist_popularity", artist.artist_id.as_str()
                ),
            },
            ArtistLookup::Unavailable => {
                unavailable += 1;
                ArtistRecord::bare(artist.artist_id.clone(), artist.artist_name.clone())
            }
        };
        enriched.push(row);
    }

    info!(artists = enriched.len(), unavailable, "transform.enrich");
    Ok(enriched)
}
