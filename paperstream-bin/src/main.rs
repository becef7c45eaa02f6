use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use paperstream_core::{
    accumulator::TurnUpdate,
    config::{Config, TransportMode},
    model::TurnRequest,
    session::{ChatSession, ChatState},
    turn::{TurnOutcome, TurnRunner},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "paperstream: chat, podcast and resume over an arXiv paper", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Route the turn through the relay broker.
    #[arg(long, global = true)]
    relay: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about a paper (prints text live)
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, default_value = "")]
        paper_url: String,
        #[arg(long)]
        model: Option<String>,
        /// JSON file holding the conversation; read before and rewritten after the turn.
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Generate a podcast; audio segments are written to --out-dir
    Podcast {
        #[arg(long)]
        paper_url: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Generate a resume of a paper
    Resume {
        #[arg(long)]
        paper_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if cli.relay {
        cfg.transport.mode = TransportMode::Relay;
    }

    let mut chat: Option<(ChatSession, Option<PathBuf>)> = None;
    let (req, out_dir) = match cli.command {
        Commands::Chat {
            message,
            paper_url,
            model,
            history,
        } => {
            let mut session = ChatSession::new(paper_url).with_model(model.unwrap_or_default());
            if let Some(path) = &history
                && tokio::fs::try_exists(path).await?
            {
                let raw = tokio::fs::read_to_string(path).await?;
                let state: ChatState =
                    serde_json::from_str(&raw).with_context(|| format!("reading history {}", path.display()))?;
                session.restore(state);
            }
            let req = session.begin_turn(&message)?;
            chat = Some((session, history));
            (req, None)
        }
        Commands::Podcast { paper_url, out_dir } => (
            TurnRequest::Podcast {
                arxiv_paper_url: paper_url,
            },
            Some(out_dir),
        ),
        Commands::Resume { paper_url } => (
            TurnRequest::Resume {
                arxiv_paper_url: paper_url,
            },
            None,
        ),
    };

    if let Some(dir) = &out_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let runner = TurnRunner::from_config(&cfg)?;
    let mut handle = runner.start_turn(req);
    let mut printed = 0usize;
    let mut segments = 0usize;
    let mut stdout = io::stdout();

    while let Some(update) = handle.next_update().await {
        if let Some((session, _)) = chat.as_mut() {
            session.observe(&update);
        }
        match update {
            TurnUpdate::Text(text) => {
                // Cumulative text only grows; print the unseen suffix.
                if let Some(tail) = text.get(printed..) {
                    print!("{tail}");
                    stdout.flush().ok();
                }
                printed = text.len();
            }
            TurnUpdate::SessionId(id) => eprintln!("[chat id: {id}]"),
            TurnUpdate::Status(s) => eprintln!("[{s}]"),
            TurnUpdate::Audio(seg) => {
                segments += 1;
                if let Some(dir) = &out_dir {
                    let path = dir.join(format!("segment-{segments}.bin"));
                    tokio::fs::write(&path, &seg.bytes)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("[audio {} -> {}]", seg.segment_id.as_deref().unwrap_or("?"), path.display());
                }
            }
            TurnUpdate::Complete(_) => {
                if printed > 0 {
                    println!();
                }
            }
            TurnUpdate::EmptyResponse => eprintln!("[empty response]"),
            TurnUpdate::Error(message) => {
                if printed > 0 {
                    println!();
                }
                eprintln!("[error: {message}]");
            }
        }
    }

    let outcome = handle.finish().await;
    if let Some((mut session, Some(path))) = chat {
        session.record_outcome(&outcome);
        let json = serde_json::to_string_pretty(session.state())?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing history {}", path.display()))?;
    }

    match outcome {
        TurnOutcome::Failed(e) => Err(e.into()),
        TurnOutcome::Completed { partial: true, .. } => {
            eprintln!("[connection dropped; output may be incomplete]");
            Ok(())
        }
        _ => Ok(()),
    }
}
