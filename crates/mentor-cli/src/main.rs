use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use mentor_config::{find_config_path, load_config, resolve_api_key};
use mentor_core::{AdapterConfig, ChatSession, Message, Provider, SessionConfig, StreamChunk};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Parser)]
#[command(name = "mentor", about = "Tutoring agent with persistent student memory", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an API key against the provider
    Validate {
        /// Key to check (defaults to the configured key)
        #[arg(long)]
        key: Option<String>,
    },
    /// Chat with the tutor
    Chat {
        /// Single message mode (non-interactive)
        #[arg(short, long)]
        message: Option<String>,

        /// Student id that memory is scoped to
        #[arg(long)]
        resource: Option<String>,

        /// Conversation thread id
        #[arg(long)]
        thread: Option<String>,

        /// Print raw SSE wire lines instead of text
        #[arg(long)]
        sse: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},mentor_core=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);
    let config = load_config(&config_path)?;
    let provider = Provider::new(AdapterConfig::from_config(&config));

    match cli.command {
        Commands::Validate { key } => {
            let Some(key) = key.or_else(|| resolve_api_key(&config)) else {
                anyhow::bail!(
                    "No API key given. Pass --key, set provider.apiKey in {}, or export OPENAI_API_KEY",
                    config_path.display()
                );
            };
            let check = provider.validate_credential(&key).await;
            println!("{}", serde_json::to_string(&check)?);
            if !check.success {
                std::process::exit(1);
            }
        }
        Commands::Chat {
            message,
            resource,
            thread,
            sse,
        } => {
            // One thread per CLI run unless the caller pins one.
            let thread = thread
                .unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp_millis()));
            let session = provider
                .create_session(SessionConfig {
                    resource_id: resource,
                    thread_id: Some(thread.clone()),
                    ..Default::default()
                })
                .await?;

            if let Some(msg) = message {
                stream_reply(&session, &[Message::user(msg)], sse).await?;
            } else {
                run_interactive(&provider, session, &thread, sse).await?;
            }
        }
    }

    Ok(())
}

/// Stream one reply to stdout. Ctrl-C drops the stream, which stops emission.
async fn stream_reply(session: &ChatSession, conversation: &[Message], sse: bool) -> Result<String> {
    let mut stream = session.stream_chat(conversation).await?;
    let mut text = String::new();
    let mut stdout = std::io::stdout();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stream aborted");
                println!();
                break;
            }
        };
        let Some(chunk) = chunk else { break };

        if sse {
            write!(stdout, "{}", chunk.to_sse())?;
        } else if let StreamChunk::Delta(delta) = &chunk {
            write!(stdout, "{delta}")?;
        }
        stdout.flush()?;

        match chunk {
            StreamChunk::Delta(delta) => text.push_str(&delta),
            StreamChunk::Done => break,
        }
    }
    if !sse {
        println!();
    }
    Ok(text)
}

async fn run_interactive(
    provider: &Provider,
    mut session: ChatSession,
    thread: &str,
    sse: bool,
) -> Result<()> {
    let history_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mentor")
        .join("history");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    let mut conversation: Vec<Message> = Vec::new();
    let mut thread = thread.to_string();

    println!("mentor interactive mode, thread {thread} (type /help for commands, Ctrl-D to quit)");
    println!();

    let result = loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                if matches!(input, "exit" | "quit" | "/exit" | "/quit" | ":q") {
                    break Ok(());
                }
                match input {
                    "/help" => {
                        println!("Commands:");
                        println!("  /new   - Start a new thread (student memory is kept)");
                        println!("  /help  - Show this help");
                        println!("  /quit  - Exit");
                        println!();
                        continue;
                    }
                    "/new" => {
                        thread = format!("cli-{}", chrono::Utc::now().timestamp_millis());
                        session = provider
                            .create_session(SessionConfig {
                                resource_id: session.options().resource_id.clone(),
                                thread_id: Some(thread.clone()),
                                ..Default::default()
                            })
                            .await?;
                        conversation.clear();
                        println!("New thread {thread}.");
                        println!();
                        continue;
                    }
                    _ => {}
                }

                conversation.push(Message::user(input));
                println!();
                match stream_reply(&session, &conversation, sse).await {
                    Ok(reply) => conversation.push(Message::assistant(reply)),
                    Err(e) => {
                        // Keep the conversation well-formed for the next turn.
                        conversation.pop();
                        eprintln!("Error: {e}");
                    }
                }
                println!();
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break Ok(());
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break Ok(());
            }
        }
    };

    let _ = rl.save_history(&history_path);
    result
}
