//! Command-line interface for slowwave
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Sleep-aid narration companion
#[derive(Parser, Debug)]
#[command(
    name = "slowwave",
    version,
    about = "Slow story narration over ambient sound, to fall asleep to"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio output device name (see `slowwave devices`)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Discard audio instead of playing it
    #[arg(long, global = true)]
    pub no_audio: bool,

    /// Timeout for each synthesis stage. Examples: 15s, 1m, 500ms
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration)]
    pub stage_timeout: Option<Duration>,
}

/// Parse a duration string.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`30s`, `2m`, `1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Where narration text comes from. Stdin when neither is given.
#[derive(Args, Debug, Clone, Default)]
pub struct TextSource {
    /// Text to use
    #[arg(long, value_name = "TEXT", conflicts_with = "file")]
    pub text: Option<String>,

    /// Read text from a file
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full session: listen on the console, narrate stories, play ambient sound
    Run,

    /// Narrate a text and exit when playback finishes
    Narrate {
        #[command(flatten)]
        source: TextSource,
    },

    /// Print how a text would be split into narration segments
    Segment {
        #[command(flatten)]
        source: TextSource,

        /// Segment length cap in characters (default: from config)
        #[arg(long, value_name = "N")]
        max_chars: Option<usize>,
    },

    /// List available audio output devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["slowwave"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.device.is_none());
        assert!(cli.stage_timeout.is_none());
        assert!(!cli.no_audio);
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_levels() {
        assert_eq!(Cli::try_parse_from(["slowwave", "-v"]).unwrap().verbose, 1);
        assert_eq!(Cli::try_parse_from(["slowwave", "-vv"]).unwrap().verbose, 2);
        assert_eq!(
            Cli::try_parse_from(["slowwave", "-v", "-v", "-v"])
                .unwrap()
                .verbose,
            3
        );
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["slowwave", "run", "--device", "USB DAC"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.device.as_deref(), Some("USB DAC"));
    }

    #[test]
    fn test_parse_narrate_text() {
        let cli = Cli::try_parse_from(["slowwave", "narrate", "--text", "晚安。"]).unwrap();
        match cli.command {
            Some(Commands::Narrate { source }) => {
                assert_eq!(source.text.as_deref(), Some("晚安。"));
                assert!(source.file.is_none());
            }
            other => panic!("Expected Narrate command, got {other:?}"),
        }
    }

    #[test]
    fn test_narrate_text_and_file_conflict() {
        let result = Cli::try_parse_from([
            "slowwave", "narrate", "--text", "a", "--file", "story.txt",
        ]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ArgumentConflict
        );
    }

    #[test]
    fn test_parse_segment_with_cap() {
        let cli = Cli::try_parse_from([
            "slowwave",
            "segment",
            "--file",
            "story.txt",
            "--max-chars",
            "120",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Segment { source, max_chars }) => {
                assert_eq!(source.file, Some(PathBuf::from("story.txt")));
                assert_eq!(max_chars, Some(120));
            }
            other => panic!("Expected Segment command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_devices() {
        let cli = Cli::try_parse_from(["slowwave", "devices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices)));
    }

    #[test]
    fn test_parse_config_actions() {
        let cli = Cli::try_parse_from(["slowwave", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
        let cli = Cli::try_parse_from(["slowwave", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Path
            })
        ));
    }

    #[test]
    fn test_config_requires_subcommand() {
        assert!(Cli::try_parse_from(["slowwave", "config"]).is_err());
    }

    #[test]
    fn test_stage_timeout_formats() {
        let cli = Cli::try_parse_from(["slowwave", "--stage-timeout", "30"]).unwrap();
        assert_eq!(cli.stage_timeout, Some(Duration::from_secs(30)));

        let cli = Cli::try_parse_from(["slowwave", "--stage-timeout", "1m30s"]).unwrap();
        assert_eq!(cli.stage_timeout, Some(Duration::from_secs(90)));

        let cli = Cli::try_parse_from(["slowwave", "--stage-timeout", "500ms"]).unwrap();
        assert_eq!(cli.stage_timeout, Some(Duration::from_millis(500)));

        assert!(Cli::try_parse_from(["slowwave", "--stage-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from([
            "slowwave",
            "narrate",
            "--no-audio",
            "-q",
            "--config",
            "/tmp/config.toml",
        ])
        .unwrap();
        assert!(cli.no_audio);
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let err = Cli::try_parse_from(["slowwave", "invalid"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["slowwave", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["slowwave", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }
}
