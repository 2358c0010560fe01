//!
//! src/cli.rs
//!
//! Command line surface. Flags override the environment-derived config.
//!

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Pulls a Spotify playlist into a relational store and summarizes it.
///
/// Without a subcommand a single `run` is performed with the configured
/// playlist.
#[derive(Debug, Parser)]
#[command(name = "playlist-etl", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, normalize, enrich and load one playlist.
    Run {
        /// Playlist to pull instead of PLAYLIST_ID.
        #[arg(long, value_name = "ID")]
        playlist_id: Option<String>,

        /// Label stored on every track row instead of PLAYLIST_NAME.
        #[arg(long, value_name = "NAME")]
        playlist_name: Option<String>,
    },

    /// Search public playlists by name and print their ids.
    FindPlaylists {
        query: String,

        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=50))]
        limit: u32,
    },

    /// Write tracks.csv and artists.csv from the store.
    Export {
        #[arg(long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
        out_dir: Option<PathBuf>,
    },

    /// Print the catalog summary as JSON.
    Summary {
        #[arg(long, value_enum, default_value_t = Source::Store)]
        source: Source,

        /// Directory holding a previous export, for `--source csv`.
        #[arg(long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
        dir: Option<PathBuf>,

        /// Length of the song and artist rankings.
        #[arg(long, value_name = "N")]
        top: Option<usize>,

        /// Print again every SECS seconds until interrupted.
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Run { playlist_id: None, playlist_name: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    Store,
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_means_run() {
        let cli = Cli::try_parse_from(["playlist-etl"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(
            cli.command.unwrap_or_default(),
            Command::Run { playlist_id: None, playlist_name: None }
        ));
    }

    #[test]
    fn run_flags_override_playlist() {
        let cli = Cli::try_parse_from([
            "playlist-etl", "run", "--playlist-id", "abc", "--playlist-name", "mix",
        ]).unwrap();
        match cli.command {
            Some(Command::Run { playlist_id, playlist_name }) => {
                assert_eq!(playlist_id.as_deref(), Some("abc"));
                assert_eq!(playlist_name.as_deref(), Some("mix"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn summary_options() {
        let cli = Cli::try_parse_from([
            "playlist-etl", "summary", "--source", "csv", "--dir", "out", "--top", "5",
        ]).unwrap();
        match cli.command {
            Some(Command::Summary { source, dir, top, watch }) => {
                assert_eq!(source, Source::Csv);
                assert_eq!(dir, Some(PathBuf::from("out")));
                assert_eq!(top, Some(5));
                assert_eq!(watch, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn search_limit_is_bounded() {
        assert!(Cli::try_parse_from(["playlist-etl", "find-playlists", "bts", "--limit", "0"])
            .is_err());
        let cli = Cli::try_parse_from(["playlist-etl", "find-playlists", "bts"]).unwrap();
        assert!(matches!(cli.command, Some(Command::FindPlaylists { limit: 10, .. })));
    }
}
