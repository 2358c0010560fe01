//!
//! src/fetch.rs
//!
//! Spotify Web API client: client-credentials handshake, paginated
//! playlist entries, single-artist lookups and playlist search.
//! Calls are issued one at a time and never retried.
//!

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header, redirect, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{HttpConfig, SpotifyConfig};
use crate::errors::EtlError;
use crate::types::{
    ArtistDetails, ArtistId, ArtistLookup, PlaylistHit, PlaylistId, PlaylistItem, PlaylistPage
};

/// Tokens are refreshed this many seconds before Spotify says they expire
const TOKEN_EXPIRY_MARGIN: u64 = 60;
const DEFAULT_TOKEN_LIFETIME: u64 = 3600;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, EtlError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| EtlError::Http(format!("build client: {e}")))
}

/// Collaborator the enrichment pass and the pipeline talk to.
#[async_trait]
pub trait MusicApi: Send {
    async fn fetch_playlist_tracks(&mut self, playlist_id: &PlaylistId) ->
        Result<Vec<PlaylistItem>, EtlError>;

    async fn fetch_artist(&mut self, artist_id: &ArtistId) ->
        Result<ArtistLookup, EtlError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct BearerToken {
    value: String,
    expires_at: Instant,
}

impl BearerToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug)]
pub struct SpotifyClient {
    http: Client,
    cfg: SpotifyConfig,
    token: Option<BearerToken>,
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) -> Result<Self, EtlError> {
        let http = base_client(http_config)?;
        Ok( Self::with_http(http, cfg) )
    }

    pub(crate) fn with_http(http: Client, cfg: &SpotifyConfig) -> Self {
        Self { http, cfg: cfg.clone(), token: None }
    }

    pub fn has_token(&self) -> bool {
        self.token.as_ref().is_some_and(BearerToken::is_fresh)
    }

    fn endpoint(&self, path: &str) -> Result<Url, EtlError> {
        self.cfg.api_base.join(path)
            .map_err(|e| EtlError::Config(format!("bad endpoint {path}: {e}")))
    }

    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/playlists/{id}/tracks?offset=&limit=&market=
    pub fn playlist_tracks(&self, playlist_id: &str, offset: u32, limit: u32, bearer: &str) ->
        Result<RequestBuilder, EtlError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}/tracks"))?;
        let mut rb = self.http.get(url).bearer_auth(bearer).query(&[
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        if !self.cfg.market.is_empty() {
            rb = rb.query(&[("market", self.cfg.market.as_str())]);
        }
        Ok(rb)
    }

    /// GET /v1/artists/{id}
    pub fn artist(&self, artist_id: &str, bearer: &str) -> Result<RequestBuilder, EtlError> {
        let url = self.endpoint(&format!("artists/{artist_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/search?type=playlist&q=...&limit=
    pub fn search(&self, query: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, EtlError> {
        let url = self.endpoint("search")?;
        let limit = limit.to_string();
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "playlist"),
            ("q", query),
            ("limit", limit.as_str()),
        ]))
    }

    /// Exchanges client id/secret for a bearer token, replacing any held one.
    pub async fn authenticate(&mut self) -> Result<(), EtlError> {
        if self.cfg.client_id.trim().is_empty() || self.cfg.client_secret.trim().is_empty() {
            return Err(EtlError::Authentication(
                "SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set".into()
            ));
        }

        let response = self.token_request()
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .send()
            .await
            .map_err(|e| EtlError::Authentication(format!("token request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::Authentication(
                format!("token endpoint returned {status}: {body}")
            ));
        }

        let token: TokenResponse = response.json().await
            .map_err(|e| EtlError::Authentication(format!("token body: {e}")))?;
        let lifetime = token.expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME)
            .saturating_sub(TOKEN_EXPIRY_MARGIN);

        self.token = Some(BearerToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!(expires_in = lifetime, "spotify.token.refreshed");
        Ok(())
    }

    /// Current bearer, authenticating first when none is held or it expired
    async fn bearer(&mut self) -> Result<String, EtlError> {
        if !self.has_token() {
            self.authenticate().await?;
        }
        self.token
            .as_ref()
            .map(|t| t.value.clone())
            .ok_or_else(|| EtlError::Authentication("no bearer token held".into()))
    }

    /// Playlists matching a free-text query; null results are dropped
    pub async fn search_playlists(&mut self, query: &str, limit: u32) ->
        Result<Vec<PlaylistHit>, EtlError> {
        let bearer = self.bearer().await?;
        let response = self.search(query, limit, &bearer)?.send().await?;
        let body: serde_json::Value = expect_success(response).await?.json().await?;

        let hits = body.pointer("/playlists/items")
            .and_then(|v| v.as_array())
            .map(|items| items.iter()
                .filter(|p| !p.is_null())
                .map(|p| PlaylistHit {
                    id: p.get("id").and_then(|v| v.as_str()).unwrap_or("No ID").to_string(),
                    name: p.get("name").and_then(|v| v.as_str()).unwrap_or("Unknown").to_string(),
                })
                .collect())
            .unwrap_or_default();
        Ok(hits)
    }
}

/// Maps any non-success status onto a Fetch error carrying the body
async fn expect_success(response: Response) -> Result<Response, EtlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EtlError::Fetch { status: status.as_u16(), body })
}

#[async_trait]
impl MusicApi for SpotifyClient {
    async fn fetch_playlist_tracks(&mut self, playlist_id: &PlaylistId) ->
        Result<Vec<PlaylistItem>, EtlError> {
        let limit = self.cfg.page_size;
        let mut all_items = Vec::new();
        let mut offset = 0_u32;

        loop {
            let bearer = self.bearer().await?;
            let response = self.playlist_tracks(playlist_id.as_str(), offset, limit, &bearer)?
                .send()
                .await?;
            let page: PlaylistPage = expect_success(response).await?.json().await?;

            let received = page.items.len();
            debug!(playlist = %playlist_id.as_str(), offset, received, "spotify.playlist.page");
            all_items.extend(page.items.into_iter().map(Option::unwrap_or_default));

            if received < limit as usize {
                break;
            }
            offset += limit;
        }

        info!(playlist = %playlist_id.as_str(), entries = all_items.len(), "spotify.playlist.done");
        Ok(all_items)
    }

    async fn fetch_artist(&mut self, artist_id: &ArtistId) -> Result<ArtistLookup, EtlError> {
        let bearer = self.bearer().await?;
        let response = self.artist(artist_id.as_str(), &bearer)?.send().await?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!(artist = %artist_id.as_str(), "spotify.artist.forbidden");
            return Ok(ArtistLookup::Unavailable);
        }

        let details: ArtistDetails = expect_success(response).await?.json().await?;
        Ok(ArtistLookup::Found(details))
    }
}
