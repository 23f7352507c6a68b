use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings_from, push::spawn_push_listener, HttpMessageBackend, Message, MediaUpload,
    OutgoingContent, Payload, ScrollOutcome, SyncEngine, SyncEvent, ThreadContext,
};
use shared::domain::{DeliveryStatus, Direction};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = client_core::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    /// Thread (customer) identifier.
    #[arg(long)]
    thread: String,
    /// Counterparty phone number, used to route push notifications.
    #[arg(long, default_value = "")]
    phone: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the newest page, plus `older` additional pages of history.
    Show {
        #[arg(long, default_value_t = 0)]
        older: u32,
    },
    Send {
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long)]
        caption: Option<String>,
    },
    Search {
        query: String,
    },
    /// Stay connected to the push channel and print transcript changes.
    Follow,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config);
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    settings.validate()?;

    let backend = Arc::new(HttpMessageBackend::from_settings(&settings)?);
    let engine = SyncEngine::new(settings, backend);
    engine
        .select_thread(ThreadContext::new(cli.thread, cli.phone))
        .await?;

    match cli.command {
        Command::Show { older } => {
            for _ in 0..older {
                match engine.on_scroll(0.0).await {
                    ScrollOutcome::Loaded { .. } => {}
                    ScrollOutcome::Exhausted => break,
                    other => {
                        warn!(?other, "history: stopped loading older pages");
                        break;
                    }
                }
            }
            print_transcript(&engine.transcript().await);
        }
        Command::Send {
            text,
            file,
            mime,
            caption,
        } => {
            let content = match (text, file) {
                (_, Some(path)) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let file_name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "upload".into());
                    let mut upload = MediaUpload::from_file_bytes(file_name, mime, bytes);
                    upload.caption = caption;
                    OutgoingContent::Media(upload)
                }
                (Some(text), None) => OutgoingContent::Text(text),
                (None, None) => return Err(anyhow!("nothing to send: pass text or --file")),
            };
            let receipt = engine.send(content).await?;
            println!("{} {:?}", receipt.local_id, receipt.status);
            if receipt.status == DeliveryStatus::Failed {
                return Err(anyhow!("send failed"));
            }
        }
        Command::Search { query } => {
            if query.trim().is_empty() {
                return Err(anyhow!("search query is empty"));
            }
            let mut events = BroadcastStream::new(engine.subscribe_events());
            engine.query(&query).await;
            while let Some(event) = events.next().await {
                match event {
                    Ok(SyncEvent::Searching(false)) => break,
                    Ok(_) => {}
                    Err(err) => warn!("search: missed events: {err}"),
                }
            }
            let view = engine.search_view().await;
            if view.no_matches {
                println!("No messages found");
            } else {
                print_transcript(&view.results);
            }
        }
        Command::Follow => follow(engine).await?,
    }

    Ok(())
}

async fn follow(engine: Arc<SyncEngine>) -> Result<()> {
    let url = engine.settings().push_endpoint()?;
    let mut events = BroadcastStream::new(engine.subscribe_events());
    let listener = spawn_push_listener(Arc::clone(&engine), &url).await?;
    print_transcript(&engine.transcript().await);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => match event {
                Some(Ok(SyncEvent::TranscriptChanged { .. })) => {
                    print_transcript(&engine.transcript().await);
                }
                Some(Ok(SyncEvent::Connectivity(connected))) => {
                    println!("-- push {}", if connected { "connected" } else { "disconnected" });
                }
                Some(Ok(SyncEvent::Notice(notice))) => println!("-- {:?}: {}", notice.level, notice.text),
                Some(Ok(_)) => {}
                Some(Err(err)) => warn!("follow: missed events: {err}"),
                None => break,
            },
        }
    }

    listener.abort();
    Ok(())
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        let who = match message.direction {
            Direction::FromMe => "me",
            Direction::FromThem => "them",
        };
        let body = match &message.payload {
            Payload::Text(text) => text.clone(),
            Payload::Media {
                location, caption, ..
            } => match caption {
                Some(caption) => format!("[{:?}] {location} {caption}", message.kind),
                None => format!("[{:?}] {location}", message.kind),
            },
        };
        println!("{} {who:>4} {body} ({:?})", message.display_time, message.status);
    }
}
