//! Interactive terminal chat. One input line is one user action.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use docchat_chat::{ChainType, StdoutSink};
use docchat_core::{Error, Provider, Result};
use docchat_session::{ChatSession, Orchestrator, TurnSettings};
use docchat_trace::FeedbackMode;

const HELP: &str = "\
Commands:
  /clear                     Clear the conversation
  /upload <path>             Load a document for document chat
  /doc on|off                Toggle document chat
  /chain <type>              stuff, refine, map_reduce, map_rerank, qa, summarization
  /model <id>                Switch model
  /feedback <token> [text]   Rate the last answer
  /thumbs, /faces            Switch feedback mode
  /trace                     Show the trace link of the last answer
  /help                      Show this help
  /quit                      Exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Clear,
    Upload(PathBuf),
    DocumentChat(bool),
    Chain(ChainType),
    Model(String),
    Feedback { token: String, comment: Option<String> },
    Mode(FeedbackMode),
    Trace,
    Help,
    Quit,
    Empty,
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Chat(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let require = |what: &str| -> Result<()> {
        if arg.is_empty() {
            Err(Error::Config(format!("/{} needs {}", name, what)))
        } else {
            Ok(())
        }
    };

    match name {
        "clear" => Ok(Command::Clear),
        "upload" => {
            require("a file path")?;
            Ok(Command::Upload(PathBuf::from(arg)))
        }
        "doc" => match arg {
            "on" => Ok(Command::DocumentChat(true)),
            "off" => Ok(Command::DocumentChat(false)),
            _ => Err(Error::Config("/doc takes on or off".into())),
        },
        "chain" => {
            require("a chain type")?;
            Ok(Command::Chain(arg.parse()?))
        }
        "model" => {
            require("a model id")?;
            Ok(Command::Model(arg.to_string()))
        }
        "feedback" => {
            require("a rating")?;
            let (token, comment) = match arg.split_once(char::is_whitespace) {
                Some((token, comment)) => (token, Some(comment.trim().to_string())),
                None => (arg, None),
            };
            Ok(Command::Feedback {
                token: token.to_string(),
                comment,
            })
        }
        "thumbs" => Ok(Command::Mode(FeedbackMode::Thumbs)),
        "faces" => Ok(Command::Mode(FeedbackMode::Faces)),
        "trace" => Ok(Command::Trace),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(Error::Config(format!("Unknown command /{}. Try /help", other))),
    }
}

fn print_transcript(session: &ChatSession) {
    for message in session.history() {
        println!("{}> {}", message.role, message.content);
    }
}

/// Read a file from disk into the session's document context.
pub async fn upload(orchestrator: &Orchestrator, session: &mut ChatSession, path: &Path) -> Result<usize> {
    let bytes = tokio::fs::read(path).await?;
    let filename = path.file_name().and_then(|n| n.to_str());
    let params = orchestrator.config().chunk_defaults;
    let context = orchestrator
        .load_document(session, &bytes, filename, params, None)
        .await?;
    Ok(context.chunks.len())
}

/// Run the loop until `/quit` or end of input.
pub async fn run(orchestrator: Orchestrator) -> anyhow::Result<()> {
    let mut session = ChatSession::new("repl");
    let mut settings = TurnSettings::from_config(orchestrator.config());
    let tracing_on = orchestrator.tracing_enabled(&session);

    info!("REPL started with model {} (tracing={})", settings.model, tracing_on);
    print_transcript(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("⚠ {}", e);
                continue;
            }
        };

        match command {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Clear => {
                session.clear();
                print_transcript(&session);
            }
            Command::Upload(path) => match upload(&orchestrator, &mut session, &path).await {
                Ok(chunks) => println!(
                    "Loaded {} ({} chunks). Use /doc on to chat with it.",
                    path.display(),
                    chunks
                ),
                Err(e) => eprintln!("⚠ {}", e),
            },
            Command::DocumentChat(on) => {
                if on && session.document().is_none() {
                    eprintln!("⚠ No document loaded; use /upload first.");
                }
                settings.document_chat = on;
                println!("Document chat {}", if on { "on" } else { "off" });
            }
            Command::Chain(chain) => {
                settings.chain_type = chain;
                println!("Chain type: {}", chain);
            }
            Command::Model(model) => match Provider::for_model(&model) {
                Some(provider) => {
                    println!("Model: {} ({})", model, provider);
                    settings.model = model;
                }
                None => eprintln!("⚠ Unsupported model: {}", model),
            },
            Command::Mode(mode) => {
                session.feedback_mode = mode;
                let tokens: Vec<&str> = mode.scores().iter().map(|(t, _)| *t).collect();
                println!("Feedback mode: {} ({})", mode, tokens.join(" "));
            }
            Command::Feedback { token, comment } => {
                match orchestrator
                    .record_feedback(&session, &token, comment.as_deref())
                    .await
                {
                    Ok(entry) => println!("Feedback recorded: {} = {}", entry.key, entry.score),
                    Err(e) => eprintln!("⚠ {}", e),
                }
            }
            Command::Trace => match session.run_record() {
                Some(run) => match &run.trace_url {
                    Some(url) => println!("Trace: {}", url),
                    None => println!("Run {} has no trace link.", run.run_id),
                },
                None => println!("No traced run yet."),
            },
            Command::Chat(message) => {
                print!("assistant> ");
                let mut sink = StdoutSink::stdout();
                match orchestrator
                    .submit(&mut session, &settings, &message, &mut sink)
                    .await
                {
                    Ok(outcome) => {
                        if let Some(url) = outcome.run.and_then(|r| r.trace_url) {
                            println!("Trace: {}", url);
                        }
                    }
                    Err(e) => {
                        println!();
                        warn!("Turn failed: {}", e);
                        eprintln!("⚠ {}", e);
                    }
                }
            }
        }
    }

    Ok(())
}
