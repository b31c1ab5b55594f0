//! Tonearm - play local files and internet radio from the terminal
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::time::Duration;
use tonearm_audio_desktop::{CpalBackend, Player, PlayerConfig, SpeedMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tonearm")]
#[command(about = "Play local audio files and live streams", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "TONEARM_CONFIG")]
    config: Option<PathBuf>,

    /// Output volume, 0.0 to 1.0
    #[arg(long, global = true, default_value_t = 1.0)]
    volume: f32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a local file (mp3, wav, flac, ogg, m4a)
    Play {
        path: PathBuf,
        /// Start this many seconds in
        #[arg(long)]
        start: Option<f64>,
        #[arg(long, value_enum, default_value_t = Speed::Normal)]
        speed: Speed,
    },
    /// Play an internet radio stream
    Stream { url: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Speed {
    #[value(name = "1x")]
    Normal,
    #[value(name = "2x")]
    Double,
    #[value(name = "0.5x")]
    Half,
}

impl From<Speed> for SpeedMode {
    fn from(speed: Speed) -> Self {
        match speed {
            Speed::Normal => SpeedMode::Normal,
            Speed::Double => SpeedMode::Double,
            Speed::Half => SpeedMode::Half,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tonearm_cli=info,tonearm_audio=info,tonearm_audio_desktop=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = PlayerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let backend = CpalBackend::shared()?;

    let player = match cli.command {
        Commands::Play { path, start, speed } => {
            let player = Player::open_with(&path, config, backend)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            player.set_speed(speed.into());
            if let Some(start) = start {
                player.seek(start)?;
            }
            player
        }
        Commands::Stream { url } => match Player::open_stream_with(&url, config, backend) {
            Ok(player) => player,
            Err(e) if e.is_missing_tool() => {
                eprintln!("{e}");
                eprintln!("Live streams need ffmpeg. Install it or set TONEARM_TRANSCODER_PATH.");
                std::process::exit(2);
            }
            Err(e) => return Err(e).context("Failed to open stream"),
        },
    };

    player.set_volume(cli.volume);
    run(&player);

    let failure = player.last_error();
    player.close();
    match failure {
        Some(e) => anyhow::bail!("Playback stopped: {}", e),
        None => Ok(()),
    }
}

/// Report progress once a second until playback completes
fn run(player: &Player) {
    let done = player.done();
    let titles = player.title_updates();

    loop {
        match done.recv_timeout(Duration::from_secs(1)) {
            Ok(()) => {
                tracing::info!("Playback finished");
                return;
            }
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(titles) = &titles {
            print_titles(titles);
        }
        if player.is_live() {
            println!("[live] {}", format_time(player.position()));
        } else {
            println!(
                "{} / {} ({})",
                format_time(player.position()),
                format_time(player.duration()),
                player.speed()
            );
        }
    }
}

fn print_titles(titles: &Receiver<String>) {
    while let Ok(title) = titles.try_recv() {
        println!("Now playing: {}", title);
    }
}

fn format_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
