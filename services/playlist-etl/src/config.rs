//!
//! src/config.rs
//!
//! Environment-derived configuration for every command
//!

use std::{str::FromStr, time};
use url::Url;

use crate::errors::EtlError;
use crate::types::PlaylistId;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Spotify caps playlist pages at 100 entries
pub const MAX_TRACKS_PER_REQUEST: u32 = 100;
pub const DEFAULT_MARKET: &str = "US";

pub const DEFAULT_PLAYLIST_ID: &str = "4U9cBN9vcM4rmDmgjfTSQH";
pub const DEFAULT_PLAYLIST_NAME: &str = "bts_all_songs";

pub const SUMMARY_CACHE_TTL: u64 = 300;
pub const SUMMARY_TOP_N: usize = 15;

/// Group and member names counted as the catalog's own artist
pub const DEFAULT_CORE_ARTISTS: &[&str] = &[
    "BTS", "RM", "Jin", "j-hope", "Jimin", "V", "Jung Kook", "Agust D", "SUGA",
];

/// Reads a variable, treating unset and blank the same
fn env_opt(s: &str) -> Option<String> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_or(s: &str, default: &str) -> String {
    env_opt(s).unwrap_or_else(|| default.to_string())
}

/// Parses a variable, falling back to default when unset or malformed
fn env_parse<T: FromStr>(s: &str, default: T) -> T {
    env_opt(s)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Comma-separated names, blanks dropped
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

/// Url::join drops the last segment unless the base ends in '/'
fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

fn parse_spotify_url(raw: &str, var: &str, host: &str) -> Result<Url, EtlError> {
    let url = Url::parse(raw)
        .map_err(|e| EtlError::Config(format!("{var} invalid {e}")))?;
    ensure_https(&url).map_err(EtlError::Config)?;
    ensure_host(&url, host).map_err(EtlError::Config)?;
    Ok(url)
}

/// Configuration that Spotify expects when hitting endpoints.
/// Credentials may be empty here; authenticate() rejects them.
#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub market: String,
    pub page_size: u32,
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url.as_str())
            .field("api_base", &self.api_base.as_str())
            .field("market", &self.market)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Clamps a requested page size into 1..=100
pub fn clamp_page_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_TRACKS_PER_REQUEST)
}

fn build_spotify() -> Result<SpotifyConfig, EtlError> {
    let client_id     = env_or("SPOTIFY_CLIENT_ID", "");
    let client_secret = env_or("SPOTIFY_CLIENT_SECRET", "");

    let token_url = parse_spotify_url(
        &env_or("SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token"),
        "SPOTIFY_TOKEN_URL",
        "accounts.spotify.com"
    )?;
    let mut api_base = parse_spotify_url(
        &env_or("SPOTIFY_API_BASE", "https://api.spotify.com/v1/"),
        "SPOTIFY_API_BASE",
        "api.spotify.com"
    )?;
    ensure_trailing_slash(&mut api_base);

    let market    = env_or("SPOTIFY_MARKET", DEFAULT_MARKET);
    let page_size = clamp_page_size(
        env_parse("SPOTIFY_PAGE_SIZE", MAX_TRACKS_PER_REQUEST)
    );

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base, market, page_size })
}

///
/// Playlist the run targets
///
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    pub id: PlaylistId,
    pub name: String,
}

fn build_playlist() -> PlaylistConfig {
    PlaylistConfig {
        id: PlaylistId(env_or("PLAYLIST_ID", DEFAULT_PLAYLIST_ID)),
        name: env_or("PLAYLIST_NAME", DEFAULT_PLAYLIST_NAME),
    }
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Configuration for the relational store and its flat-file export
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub db_url: String,
    pub export_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite:./data/playlist.db".to_string(),
            export_dir: "./data".to_string(),
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let defaults = PersistenceConfig::default();
    PersistenceConfig {
        db_url: env_or("DATABASE_URL", &defaults.db_url),
        export_dir: env_or("EXPORT_DIR", &defaults.export_dir),
    }
}

///
/// Configuration for the catalog summary
///
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub cache_ttl: time::Duration,
    pub top_n: usize,
    pub core_artists: Vec<String>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: time::Duration::from_secs(SUMMARY_CACHE_TTL),
            top_n: SUMMARY_TOP_N,
            core_artists: DEFAULT_CORE_ARTISTS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

fn build_summary() -> SummaryConfig {
    SummaryConfig {
        cache_ttl: time::Duration::from_secs(
            env_parse("SUMMARY_CACHE_TTL_SECS", SUMMARY_CACHE_TTL)
        ),
        top_n: env_parse("SUMMARY_TOP_N", SUMMARY_TOP_N),
        core_artists: env_opt("SUMMARY_CORE_ARTISTS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| SummaryConfig::default().core_artists),
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<LogFormat> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json"   => Some(LogFormat::Json),
            _ => None
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,playlist_etl=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if let Some(format) = env_opt("LOG_FORMAT").as_deref().and_then(LogFormat::parse) {
        logging.format = format;
    }
    logging
}

///
/// AppConfig which holds everything the commands need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub playlist: PlaylistConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub summary: SummaryConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, EtlError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let playlist    = build_playlist();
    let http        = HttpConfig::default();
    let persistence = build_persistence();
    let summary     = build_summary();
    let logging     = build_logging();

    Ok( AppConfig { spotify, playlist, http, persistence, summary, logging } )
}
