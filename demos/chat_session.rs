//! Streaming chat with one local function, driven through a retrying session.
//!
//! ```text
//! cargo run --example chat_session -- backend.yaml "What time is it in UTC?"
//! ANTHROPIC_API_KEY=... cargo run --example chat_session
//! ```

use std::env;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use ai_chat_rust::types::{Schema, SchemaType};
use ai_chat_rust::{
    BackendConfig, BackendKind, ChatClient, DeliveryUnit, FunctionDefinition, ToolCall,
    ToolResult, TransportConfig,
};
use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::json;

const MAX_TOOL_ROUNDS: usize = 3;

fn load_config(path: Option<&str>) -> anyhow::Result<BackendConfig> {
    if let Some(path) = path {
        return BackendConfig::from_path(path).with_context(|| format!("loading {}", path));
    }
    let key = env::var("ANTHROPIC_API_KEY")
        .context("pass a backend config path or set ANTHROPIC_API_KEY")?;
    let transport = TransportConfig::new("https://api.anthropic.com/v1")
        .with_api_key(key)
        .with_auth("x-api-key", None);
    Ok(BackendConfig::new(BackendKind::Messages, transport))
}

fn clock_function() -> FunctionDefinition {
    FunctionDefinition::new("unix_clock", "Returns the current Unix time in seconds.").with_parameters(
        Schema::object().with_property(
            "timezone",
            Schema::new(SchemaType::String).with_description("Informational only"),
            false,
        ),
    )
}

fn run_tool(call: &ToolCall) -> ToolResult {
    let payload = match call.name.as_str() {
        "unix_clock" => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            json!({"unix_seconds": secs})
        }
        other => json!({"error": format!("unknown function {}", other)}),
    };
    ToolResult::for_call(call, payload)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    let prompt = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "What is the current Unix time?".to_string());

    let client = ChatClient::from_config(&config)?;
    println!("backend: {}  models: {:?}", client.backend().name(), client.list_models());

    let mut chat = client.start_retrying_chat("You are a concise assistant.");
    chat.session_mut().set_functions(vec![clock_function()])?;

    let mut pending: Vec<ToolResult> = Vec::new();
    for round in 0..=MAX_TOOL_ROUNDS {
        if round == MAX_TOOL_ROUNDS {
            bail!("model kept requesting tools after {} rounds", MAX_TOOL_ROUNDS);
        }

        let mut stream = if pending.is_empty() {
            chat.send_streaming(prompt.as_str()).await?
        } else {
            chat.send_streaming(std::mem::take(&mut pending)).await?
        };

        let mut calls = Vec::new();
        while let Some(unit) = stream.next().await {
            match unit? {
                DeliveryUnit::TextDelta(t) => {
                    print!("{}", t);
                    std::io::stdout().flush()?;
                }
                DeliveryUnit::CompletedToolCall(call) => calls.push(call),
                DeliveryUnit::UsageReport(u) => {
                    println!("\n[usage] in={} out={}", u.input_tokens, u.output_tokens);
                }
            }
        }
        drop(stream);

        if calls.is_empty() {
            break;
        }
        for call in &calls {
            println!("\n[tool] {}({})", call.name, serde_json::Value::Object(call.arguments.clone()));
            pending.push(run_tool(call));
        }
    }

    println!("\nhistory: {} messages", chat.session().history().len());
    Ok(())
}
