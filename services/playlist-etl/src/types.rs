//!
//! src/types.rs
//!
//! Identifier newtypes, the raw payload shapes returned by the Spotify Web
//! API, and the two flat records the pipeline produces from them.
//!

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtistId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub String);

impl TrackId {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl ArtistId {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl PlaylistId {
    pub fn as_str(&self) -> &str { &self.0 }
}

/// One entry of a playlist's `tracks` collection. Either field may be
/// absent: removed tracks come back with `track: null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistItem {
    pub added_at: Option<String>,
    pub track: Option<RawTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTrack {
    pub id: Option<String>,
    pub name: Option<String>,
    pub album: Option<RawAlbum>,
    pub artists: Option<Vec<RawArtistRef>>,
    pub popularity: Option<i32>,
    pub duration_ms: Option<i64>,
}

impl RawTrack {
    /// First listed artist, the one a track is attributed to
    pub fn primary_artist(&self) -> Option<&RawArtistRef> {
        self.artists.as_ref().and_then(|a| a.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAlbum {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawArtistRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// GET /v1/playlists/{id}/tracks page body
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistPage {
    pub items: Vec<Option<PlaylistItem>>,
}

/// GET /v1/artists/{id} body, reduced to what enrichment reads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArtistDetails {
    pub genres: Vec<String>,
    pub followers: Option<Followers>,
    pub popularity: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Followers {
    pub total: Option<i64>,
}

/// Outcome of a single artist lookup. `Unavailable` is what the service
/// answers with 403 for some artists; it is not "an artist with no genres".
#[derive(Debug, Clone, PartialEq)]
pub enum ArtistLookup {
    Found(ArtistDetails),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistHit {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: TrackId,
    pub track_name: Option<String>,
    pub album_name: Option<String>,
    pub artist_id: ArtistId,
    pub artist_name: Option<String>,
    pub popularity: Option<i32>,
    pub duration_ms: Option<i64>,
    pub added_at: Option<String>,
    pub playlist_name: String,
    pub playlist_id: PlaylistId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub artist_id: ArtistId,
    pub artist_name: Option<String>,
    pub genres: Option<String>,
    pub followers: Option<i64>,
    pub artist_popularity: Option<i32>,
}

impl ArtistRecord {
    /// Artist row as projected from tracks, before any enrichment
    pub fn bare(artist_id: ArtistId, artist_name: Option<String>) -> Self {
        Self {
            artist_id,
            artist_name,
            genres: None,
            followers: None,
            artist_popularity: None,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.genres.is_some()
    }
}
