//! `kiln` — headless CLI for talking to `kilnd` over its HTTP/SSE gateway:
//! enqueue functions, start chats, send agent messages, resume paused
//! approvals, and stream a channel's output.

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    about = "Headless client for the kiln agent daemon",
    version
)]
struct Cli {
    /// Gateway base URL.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8787")]
    url: String,

    /// Bearer token for the gateway's configured `static_tokens` map.
    #[arg(long, global = true, env = "KILN_TOKEN")]
    token: Option<String>,

    /// Print raw JSON responses instead of a formatted summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether the daemon's gateway is reachable.
    Health,
    /// Start a new chat against an agent spec.
    CreateChat {
        /// Namespace of the agent spec, e.g. `"builtin"`.
        namespace: String,
        /// Name of the agent spec.
        name: String,
        /// JSON literal passed as the agent's input.
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Send a message to a chat and print the job id.
    Send {
        chat_id: String,
        content: String,
        /// Channel id to stream the response on; defaults to the chat id.
        #[arg(long)]
        channel: Option<String>,
    },
    /// Approve or reject a paused tool call.
    Resume {
        approval_id: String,
        /// Approve the call. Pass `--approved=false` to reject.
        #[arg(long, default_value_t = true)]
        approved: bool,
        channel: String,
    },
    /// Stream a channel's output as it arrives.
    Stream { channel_id: String },
    /// Enqueue a function job directly, bypassing the agent engine.
    EnqueueFunction {
        namespace: String,
        name: String,
        /// JSON literal passed as the function's input.
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Create a chat, send one message, and stream the reply to completion.
    Chat {
        namespace: String,
        name: String,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res: Value = client
                .get(format!("{}/api/v1/health", cli.url))
                .send()
                .await?
                .json()
                .await?;
            print_result(&cli, &res, |v| format!("status: {}", v["status"]));
        }
        Commands::CreateChat {
            namespace,
            name,
            input,
        } => {
            let agent_input: Value = serde_json::from_str(&input)?;
            let res = authed(&client, &cli, reqwest::Method::POST, "/api/v1/chats")
                .json(&json!({
                    "agent_namespace": namespace,
                    "agent_name": name,
                    "agent_input": agent_input,
                }))
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            print_result(&cli, &res, |v| format!("chat_id: {}", v["chat_id"]));
        }
        Commands::Send {
            chat_id,
            content,
            channel,
        } => {
            let path = format!("/api/v1/chats/{chat_id}/messages");
            let res = authed(&client, &cli, reqwest::Method::POST, &path)
                .json(&json!({ "content": content, "channel_id": channel }))
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            print_result(&cli, &res, |v| {
                format!("job_id: {}, channel_id: {}", v["job_id"], v["channel_id"])
            });
        }
        Commands::Resume {
            approval_id,
            approved,
            channel,
        } => {
            let path = format!("/api/v1/approvals/{approval_id}/resume");
            let res = authed(&client, &cli, reqwest::Method::POST, &path)
                .json(&json!({ "approved": approved, "channel_id": channel }))
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            print_result(&cli, &res, |v| format!("job_id: {}", v["job_id"]));
        }
        Commands::Stream { channel_id } => {
            stream_channel(&client, &cli, &channel_id).await?;
        }
        Commands::EnqueueFunction {
            namespace,
            name,
            input,
        } => {
            let fn_input: Value = serde_json::from_str(&input)?;
            let res = authed(&client, &cli, reqwest::Method::POST, "/api/v1/functions")
                .json(&json!({
                    "namespace": namespace,
                    "name": name,
                    "input": fn_input,
                }))
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            print_result(&cli, &res, |v| format!("job_id: {}", v["job_id"]));
        }
        Commands::Chat {
            namespace,
            name,
            message,
        } => {
            let created: Value = authed(&client, &cli, reqwest::Method::POST, "/api/v1/chats")
                .json(&json!({
                    "agent_namespace": namespace,
                    "agent_name": name,
                    "agent_input": {},
                }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let chat_id = created["chat_id"].as_str().unwrap_or_default().to_string();

            let path = format!("/api/v1/chats/{chat_id}/messages");
            let sent: Value = authed(&client, &cli, reqwest::Method::POST, &path)
                .json(&json!({ "content": message, "channel_id": Value::Null }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let channel_id = sent["channel_id"].as_str().unwrap_or(&chat_id).to_string();

            stream_channel(&client, &cli, &channel_id).await?;
        }
    }

    Ok(())
}

fn authed(
    client: &reqwest::Client,
    cli: &Cli,
    method: reqwest::Method,
    path: &str,
) -> reqwest::RequestBuilder {
    let req = client.request(method, format!("{}{path}", cli.url));
    match &cli.token {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

async fn stream_channel(
    client: &reqwest::Client,
    cli: &Cli,
    channel_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = format!("/api/v1/stream/{channel_id}");
    let response = authed(client, cli, reqwest::Method::GET, &path)
        .send()
        .await?
        .error_for_status()?;

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        let event = event?;
        let envelope: Value = serde_json::from_str(&event.data)?;
        if cli.json {
            println!("{}", event.data);
        } else {
            print_envelope(&envelope);
        }
        if envelope["type"] == "done" || envelope["type"] == "error" {
            break;
        }
    }
    Ok(())
}

fn print_envelope(envelope: &Value) {
    match envelope["type"].as_str() {
        Some("content") => {
            if let Some(delta) = envelope["delta"].as_str() {
                print!("{delta}");
                let _ = io::stdout().flush();
            }
        }
        Some("tool_call_delta") => {
            if let Some(name) = envelope["name"].as_str() {
                println!("\n[tool call] {name}");
            }
        }
        Some("approval_required") => {
            println!(
                "\n[approval required] {} {} (tool_call_id: {})",
                envelope["function_ref"].as_str().unwrap_or(""),
                envelope["arguments"],
                envelope["tool_call_id"].as_str().unwrap_or("")
            );
        }
        Some("tool_rejected") => {
            println!(
                "\n[tool rejected] tool_call_id: {}",
                envelope["tool_call_id"].as_str().unwrap_or("")
            );
        }
        Some("done") => println!("\n[done]"),
        Some("error") => println!("\n[error] {}", envelope["error"]),
        _ => println!("{envelope}"),
    }
}

fn print_result(cli: &Cli, value: &Value, fmt: impl Fn(&Value) -> String) {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    } else {
        println!("{}", fmt(value));
    }
}
