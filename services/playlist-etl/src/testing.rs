//!
//! src/testing.rs
//!
//! Fixtures and an in-memory MusicApi shared by the unit tests
//!

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::EtlError;
use crate::fetch::MusicApi;
use crate::types::{
    ArtistDetails, ArtistId, ArtistLookup, ArtistRecord, Followers, PlaylistId, PlaylistItem,
    RawAlbum, RawArtistRef, RawTrack, TrackId, TrackRecord
};

pub fn entry(track_id: &str, artist_id: &str, artist_name: &str, popularity: i32, duration_ms: i64)
    -> PlaylistItem {
    PlaylistItem {
        added_at: Some("2024-03-01T10:00:00Z".into()),
        track: Some(RawTrack {
            id: Some(track_id.into()),
            name: Some(format!("Song {track_id}")),
            album: Some(RawAlbum { name: Some(format!("Album {track_id}")) }),
            artists: Some(vec![RawArtistRef {
                id: Some(artist_id.into()),
                name: Some(artist_name.into()),
            }]),
            popularity: Some(popularity),
            duration_ms: Some(duration_ms),
        }),
    }
}

pub fn removed_entry() -> PlaylistItem {
    PlaylistItem { added_at: Some("2024-03-01T10:00:00Z".into()), track: None }
}

pub fn track(track_id: &str, name: &str, artist_id: &str, artist_name: &str,
    popularity: i32, duration_ms: i64) -> TrackRecord {
    TrackRecord {
        track_id: TrackId(track_id.into()),
        track_name: Some(name.into()),
        album_name: Some("Album".into()),
        artist_id: ArtistId(artist_id.into()),
        artist_name: Some(artist_name.into()),
        popularity: Some(popularity),
        duration_ms: Some(duration_ms),
        added_at: Some("2024-03-01T10:00:00".into()),
        playlist_name: "mix".into(),
        playlist_id: PlaylistId("pl-1".into()),
    }
}

pub fn artist(artist_id: &str, name: &str, followers: Option<i64>) -> ArtistRecord {
    ArtistRecord {
        artist_id: ArtistId(artist_id.into()),
        artist_name: Some(name.into()),
        genres: followers.map(|_| "k-pop".to_string()),
        followers,
        artist_popularity: followers.map(|_| 70),
    }
}

enum Canned {
    Found(ArtistDetails),
    Forbidden,
    Status(u16),
}

/// Answers from canned data and records every call it receives
#[derive(Default)]
pub struct FakeApi {
    playlist: Vec<PlaylistItem>,
    artists: HashMap<String, Canned>,
    pub playlist_calls: usize,
    pub artist_calls: Vec<String>,
}

impl FakeApi {
    pub fn with_playlist(mut self, entries: Vec<PlaylistItem>) -> Self {
        self.playlist = entries;
        self
    }

    pub fn with_artist(mut self, id: &str, genres: &[&str], followers: i64, popularity: i32)
        -> Self {
        self.artists.insert(id.into(), Canned::Found(ArtistDetails {
            genres: genres.iter().map(|g| g.to_string()).collect(),
            followers: Some(Followers { total: Some(followers) }),
            popularity: Some(popularity),
        }));
        self
    }

    pub fn forbid(mut self, id: &str) -> Self {
        self.artists.insert(id.into(), Canned::Forbidden);
        self
    }

    pub fn fail(mut self, id: &str, status: u16) -> Self {
        self.artists.insert(id.into(), Canned::Status(status));
        self
    }
}

#[async_trait]
impl MusicApi for FakeApi {
    async fn fetch_playlist_tracks(&mut self, _playlist_id: &PlaylistId) ->
        Result<Vec<PlaylistItem>, EtlError> {
        self.playlist_calls += 1;
        Ok(self.playlist.clone())
    }

    async fn fetch_artist(&mut self, artist_id: &ArtistId) -> Result<ArtistLookup, EtlError> {
        self.artist_calls.push(artist_id.0.clone());
        match self.artists.get(artist_id.as_str()) {
            Some(Canned::Found(details)) => Ok(ArtistLookup::Found(details.clone())),
            Some(Canned::Forbidden) => Ok(ArtistLookup::Unavailable),
            Some(Canned::Status(status)) => Err(EtlError::Fetch {
                status: *status,
                body: "canned failure".into(),
            }),
            None => Err(EtlError::Fetch { status: 404, body: "unknown artist".into() }),
        }
    }
}
