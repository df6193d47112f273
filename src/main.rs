use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use slowwave::app::{RunOptions, read_input_text, run_narrate_command, run_session_command};
use slowwave::cli::{Cli, Commands, ConfigAction, TextSource};
use slowwave::config::Config;
use slowwave::narration::split_segments;
use slowwave::output::format_segments;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let options = RunOptions {
        quiet: cli.quiet,
        device: cli.device.clone(),
        no_audio: cli.no_audio,
        stage_timeout: cli.stage_timeout,
    };

    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(cli.config.as_deref())?;
            run_session_command(config, options).await?;
        }
        Some(Commands::Narrate { source }) => {
            let config = load_config(cli.config.as_deref())?;
            let text = read_text(source)?;
            run_narrate_command(config, options, &text).await?;
        }
        Some(Commands::Segment { source, max_chars }) => {
            let config = load_config(cli.config.as_deref())?;
            let text = read_text(source)?;
            let cap = max_chars.unwrap_or(config.narration.max_segment_chars);
            let segments = split_segments(&text, cap);
            print!("{}", format_segments(&segments));
            if !cli.quiet {
                eprintln!("{}", format!("{} segments", segments.len()).dimmed());
            }
        }
        Some(Commands::Devices) => {
            list_output_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "slowwave", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` raises the level from `warn`.
fn init_logging(quiet: bool, verbose: u8) {
    let default_filter = match (quiet, verbose) {
        (true, _) | (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/slowwave/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied on top.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

fn read_text(source: TextSource) -> Result<String> {
    Ok(read_input_text(source.text, source.file.as_deref())?)
}

#[cfg(feature = "cpal-audio")]
fn list_output_devices() -> Result<()> {
    let devices = slowwave::audio::device::list_output_devices()?;

    if devices.is_empty() {
        eprintln!("No audio output devices found");
        std::process::exit(1);
    }

    println!("Available audio output devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_output_devices() -> Result<()> {
    eprintln!("{}", "Built without audio output support (feature cpal-audio)".yellow());
    std::process::exit(1);
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .or_else(Config::default_path);

    match action {
        ConfigAction::Path => match config_path {
            Some(path) => {
                let marker = if path.exists() { "" } else { " (not created)" };
                println!("{}{}", path.display(), marker.dimmed());
            }
            None => {
                eprintln!("{}", "No configuration directory on this system".red());
                std::process::exit(1);
            }
        },
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
            if let Err(e) = config.tts.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
            print!("{}", config.redacted().to_toml()?);
        }
    }
    Ok(())
}
