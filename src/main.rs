//! domtape - record document sessions and play them back
//!
//! # Commands
//!
//! - `domtape serve` - Run the chunk server recorders upload to
//! - `domtape inspect <SESSION>` - Summarise a stored session
//! - `domtape replay <SESSION>` - Replay a stored session headlessly and print the result

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use domtape::player::{MemorySurface, PlaybackState, Player, PlayerEvent};
use domtape::transport::server::run_server;
use domtape::{util, ChunkStore, Config, SessionSource};

#[derive(Parser)]
#[command(name = "domtape")]
#[command(about = "Record document sessions and replay them deterministically")]
#[command(version)]
struct Cli {
    /// Use a custom data directory instead of ~/.domtape
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chunk server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Session directory (defaults to the configured store)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Print a summary of a stored session
    Inspect {
        session: String,
        #[arg(long)]
        store: Option<PathBuf>,
        /// Cut the record list at the first gap instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Replay a stored session on a virtual clock and print the final markup
    Replay {
        session: String,
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        lenient: bool,
        /// Playback speed, 1 to 5
        #[arg(long)]
        speed: Option<u32>,
        /// Stop once this many records have been applied, skipping cosmetic ones
        #[arg(long)]
        seek: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir);

    // Log to ~/.domtape/logs/domtape.log
    let log_path = util::log_file_path();
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Serve { host, port, store } => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            let dir = store.unwrap_or(config.store_dir);
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            println!("Serving {} on http://{}:{}", dir.display(), server.host, server.port);
            run_server(ChunkStore::new(dir), server).await
        }
        Commands::Inspect {
            session,
            store,
            lenient,
        } => {
            let source = ChunkStore::new(store.unwrap_or(config.store_dir));
            inspect(&source, &session, lenient).await
        }
        Commands::Replay {
            session,
            store,
            lenient,
            speed,
            seek,
        } => {
            let source = ChunkStore::new(store.unwrap_or(config.store_dir));
            let mut options = config.player;
            if let Some(speed) = speed {
                options.speed = speed;
            }
            replay(&source, &session, lenient, options, seek).await
        }
    }
}

async fn inspect(source: &ChunkStore, session_id: &str, lenient: bool) -> Result<()> {
    let session = source.fetch_session(session_id, lenient).await?;

    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &session.record_items {
        *kinds.entry(record.kind.name()).or_default() += 1;
    }

    println!("Session:         {}", session.session_id);
    println!("Location:        {}", session.location);
    println!("Records:         {}", session.record_items.len());
    println!("Duration:        {} ms", session.duration_ms());
    println!("Fully recorded:  {}", session.is_fully_recorded());
    if session.lost_records > 0 {
        println!("Lost records:    {}", session.lost_records);
    }
    for (kind, count) in &kinds {
        println!("  {kind:<18} {count}");
    }

    let highlights = session.highlights();
    if !highlights.is_empty() {
        println!("Highlights:");
        for entry in highlights {
            println!(
                "  #{:<6} {:>8} ms  [{}] {}",
                entry.index, entry.timestamp, entry.semantic_tag, entry.description
            );
        }
    }
    Ok(())
}

async fn replay(
    source: &ChunkStore,
    session_id: &str,
    lenient: bool,
    options: domtape::PlayerOptions,
    seek: Option<usize>,
) -> Result<()> {
    let (mut player, mut events) = Player::new(MemorySurface::default(), options);
    player.fetch(source, session_id, lenient).await?;

    let mut now = 0;
    match seek {
        Some(index) => player.rewind(index, now).await?,
        None => player.play(now).await?,
    }

    let mut seek_done = false;
    loop {
        while let Ok(event) = events.try_recv() {
            seek_done |= matches!(event, PlayerEvent::SeekFinished { .. });
            print_event(&event);
        }
        if seek_done || matches!(player.state(), PlaybackState::Finished | PlaybackState::Paused) {
            break;
        }
        match player.next_deadline() {
            Some(deadline) => {
                now = now.max(deadline);
                player.poll(now)?;
            }
            None => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    println!("{}", player.document().to_markup(player.document().root()));
    Ok(())
}

fn print_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::State(state) => println!("state    {state:?}"),
        PlayerEvent::Progress(progress) => println!("progress {progress:.1}%"),
        PlayerEvent::Status(message) => println!("status   {message}"),
        PlayerEvent::SeekFinished { reason } => println!("seek     {reason:?}"),
        PlayerEvent::Finished => println!("finished"),
        PlayerEvent::Error(message) => eprintln!("error    {message}"),
        PlayerEvent::Pointer { .. } | PlayerEvent::Click { .. } => {}
    }
}
