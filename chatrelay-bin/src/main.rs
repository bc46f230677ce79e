use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use chatrelay_core::{
    config::Config,
    model::{ChatMessageReq, GetConversationVarReq, WorkflowReq},
    relay::RelayHooks,
    sink::SseWriterSink,
    ChatClient, StreamOutcome,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "chatrelay CLI", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a chat reply, printing the answer as it grows
    Chat {
        #[arg(short, long, help = "Message from the user")]
        query: String,
        #[arg(short, long)]
        user: String,
        #[arg(long, help = "Continue an existing conversation")]
        conversation: Option<String>,
    },
    /// Relay the raw event stream to stdout, then append a status frame
    Proxy {
        #[arg(short, long, help = "Message from the user")]
        query: String,
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List conversation variables
    Vars {
        #[arg(long)]
        conversation: String,
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Run a workflow in blocking mode
    Workflow {
        #[arg(short, long)]
        user: String,
        #[arg(short, long = "input", value_parser = parse_key_val, help = "key=value, repeatable")]
        inputs: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::from_path(p)
            .with_context(|| format!("loading config from {}", p.display()))?,
        None => Config::default(),
    };
    if let Ok(base) = std::env::var("CHATRELAY_BASE_URL") {
        cfg.backend.base_url = base;
    }
    Ok(cfg)
}

fn chat_request(query: String, user: String, conversation: Option<String>) -> ChatMessageReq {
    let mut req = ChatMessageReq::new(query, user);
    req.conversation_id = conversation.unwrap_or_default();
    req
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    let client = ChatClient::from_config(&cfg)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Chat {
            query,
            user,
            conversation,
        } => {
            let mut printed = 0usize;
            let hooks = RelayHooks::new().on_answer_changed(move |answer: &str| {
                print!("{}", &answer[printed..]);
                io::stdout().flush().ok();
                printed = answer.len();
            });
            let outcome = client
                .stream_chat(chat_request(query, user, conversation), hooks, &cancel)
                .await;
            println!();
            match outcome.into_result() {
                Ok(res) => {
                    eprintln!(
                        "[conversation: {} message: {} references: {}]",
                        res.conversation_id,
                        res.message_id,
                        res.retrieved_references.len()
                    );
                }
                Err(e) if e.is_cancelled() => eprintln!("[cancelled]"),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Proxy {
            query,
            user,
            conversation,
        } => {
            let mut sink = SseWriterSink::new(tokio::io::stdout());
            let outcome = client
                .proxy_stream_chat(
                    chat_request(query, user, conversation),
                    &mut sink,
                    None,
                    |o: &StreamOutcome| {
                        vec![serde_json::json!({"event": "relay_status", "outcome": o.kind()}).to_string()]
                    },
                    &cancel,
                )
                .await;
            if let Err(e) = outcome.into_result()
                && !e.is_cancelled()
            {
                return Err(e.into());
            }
        }
        Commands::Vars {
            conversation,
            user,
            name,
            limit,
        } => {
            let page = client
                .conversation_variables(&GetConversationVarReq {
                    conversation_id: conversation,
                    user,
                    last_id: None,
                    limit,
                    variable_name: name,
                })
                .await?;
            for var in &page.data {
                println!("{} ({}) = {}", var.name, var.value_type, var.value);
            }
            if page.has_more {
                eprintln!("[more variables available]");
            }
        }
        Commands::Workflow { user, inputs } => {
            let inputs: HashMap<String, serde_json::Value> = inputs
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let res = client
                .run_workflow(WorkflowReq {
                    inputs,
                    response_mode: String::new(),
                    user,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&res.data.outputs)?);
            if let Some(err) = res.data.error {
                eprintln!("[workflow {}: {}]", res.data.status, err);
            }
        }
    }

    Ok(())
}
