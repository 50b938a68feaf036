use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::time::Instant;

use briefpipe_core::{Error as PipelineError, ResearchRequest};
use briefpipe_local::agent::{AgentVendorConfig, ChatMessage};
use briefpipe_local::stream::relay_chat_stream;
use briefpipe_local::{deep_research, run_research_pipeline, search, ResearchRuntime};

const SCHEMA_VERSION: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "briefpipe")]
#[command(about = "Company diligence research pipeline (search + deep research + structured agents)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one research pass and print the result envelope (json).
    Research(ResearchCmd),
    /// Stream a single chat completion through the resolved agent vendor.
    Chat(ChatCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// Company name to research.
    #[arg(long)]
    company: Option<String>,
    /// Topic to focus the research on.
    #[arg(long)]
    topic: Option<String>,
    /// Industry context.
    #[arg(long)]
    industry: Option<String>,
    /// Headquarters location context.
    #[arg(long)]
    hq_location: Option<String>,
    /// Focus tag (repeatable).
    #[arg(long)]
    focus: Vec<String>,
    /// Explicit query override; wins over the descriptive fields.
    #[arg(long)]
    query: Option<String>,
    /// Desired result count (clamped server-side).
    #[arg(long)]
    max_results: Option<u32>,
    /// Read the request body as JSON from a file ("-" for stdin).
    /// Overrides the individual flags.
    #[arg(long)]
    body_json: Option<std::path::PathBuf>,
    /// Output JSON path (default: stdout).
    #[arg(long)]
    out: Option<std::path::PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    /// User prompt to send.
    #[arg(long)]
    prompt: String,
    /// Optional system message.
    #[arg(long)]
    system: Option<String>,
    /// Model override (default: the vendor's chat model).
    #[arg(long)]
    model: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {}

#[derive(clap::Args, Debug)]
struct VersionCmd {}

#[derive(Clone, Copy, Debug)]
enum ErrorCode {
    InvalidInput,
    NotConfigured,
    SearchFailed,
    DeepResearchFailed,
    AgentFailed,
    StreamFailed,
    SchemaMismatch,
    UnexpectedError,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotConfigured => "not_configured",
            Self::SearchFailed => "search_failed",
            Self::DeepResearchFailed => "deep_research_failed",
            Self::AgentFailed => "agent_failed",
            Self::StreamFailed => "stream_failed",
            Self::SchemaMismatch => "schema_mismatch",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    fn retryable(self) -> bool {
        match self {
            Self::SearchFailed | Self::DeepResearchFailed | Self::AgentFailed | Self::StreamFailed => {
                true
            }
            // Configuration + invalid input are not retryable without
            // changing something first.
            Self::InvalidInput | Self::NotConfigured | Self::SchemaMismatch | Self::UnexpectedError => {
                false
            }
        }
    }

    fn hint(self) -> &'static str {
        match self {
            Self::InvalidInput => {
                "Pass at least one of --query, --company, --topic, --industry, --hq-location."
            }
            Self::NotConfigured => {
                "Run `briefpipe doctor` to see which provider credentials are missing."
            }
            Self::SearchFailed => "The search provider call failed; retry or check the endpoint.",
            Self::DeepResearchFailed => "The deep research provider call failed.",
            Self::AgentFailed => "The structured agent call failed.",
            Self::StreamFailed => "The streaming relay aborted.",
            Self::SchemaMismatch => "The model output did not match the declared shape.",
            Self::UnexpectedError => "Unexpected internal failure.",
        }
    }
}

fn error_code_for(err: &PipelineError) -> ErrorCode {
    match err {
        PipelineError::Input(_) => ErrorCode::InvalidInput,
        PipelineError::NotConfigured(_) => ErrorCode::NotConfigured,
        PipelineError::Search(_) => ErrorCode::SearchFailed,
        PipelineError::DeepResearch(_) => ErrorCode::DeepResearchFailed,
        PipelineError::Agent(_) => ErrorCode::AgentFailed,
        PipelineError::Stream(_) => ErrorCode::StreamFailed,
        PipelineError::Schema(_) => ErrorCode::SchemaMismatch,
        PipelineError::Pipeline(_) => ErrorCode::UnexpectedError,
    }
}

fn error_obj(code: ErrorCode, message: impl ToString) -> serde_json::Value {
    serde_json::json!({
        "code": code.as_str(),
        "message": message.to_string(),
        "hint": code.hint(),
        "retryable": code.retryable(),
    })
}

fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}

fn emit(payload: &serde_json::Value, out: Option<&std::path::Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(payload)?;
    match out {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Research(cmd) => run_research(cmd).await,
        Commands::Chat(cmd) => run_chat(cmd).await,
        Commands::Doctor(cmd) => run_doctor(cmd).await,
        Commands::Version(cmd) => run_version(cmd),
    }
}

async fn run_research(cmd: ResearchCmd) -> Result<()> {
    let t0 = Instant::now();

    let body = match read_body(&cmd) {
        Ok(body) => body,
        Err(message) => {
            let mut payload = serde_json::json!({
                "ok": false,
                "error": error_obj(ErrorCode::InvalidInput, message),
            });
            add_envelope_fields(&mut payload, "research", t0.elapsed().as_millis());
            return emit(&payload, cmd.out.as_deref());
        }
    };

    let runtime = ResearchRuntime::new(reqwest::Client::new());
    let mut payload = match run_research_pipeline(&runtime, body).await {
        Ok(output) => serde_json::json!({
            "ok": true,
            "result": serde_json::to_value(&output)?,
        }),
        Err(err) => serde_json::json!({
            "ok": false,
            "error": error_obj(error_code_for(&err), &err),
        }),
    };
    add_envelope_fields(&mut payload, "research", t0.elapsed().as_millis());
    emit(&payload, cmd.out.as_deref())
}

fn read_body(cmd: &ResearchCmd) -> std::result::Result<ResearchRequest, String> {
    if let Some(path) = cmd.body_json.as_deref() {
        let raw = if path.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            buf
        } else {
            std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?
        };
        return serde_json::from_str(&raw).map_err(|e| format!("invalid JSON body: {e}"));
    }
    Ok(ResearchRequest {
        company: cmd.company.clone(),
        topic: cmd.topic.clone(),
        industry: cmd.industry.clone(),
        hq_location: cmd.hq_location.clone(),
        focus: if cmd.focus.is_empty() {
            None
        } else {
            Some(serde_json::json!(cmd.focus))
        },
        query: cmd.query.clone(),
        max_results: cmd.max_results.map(|n| serde_json::json!(n)),
    })
}

async fn run_chat(cmd: ChatCmd) -> Result<()> {
    let runtime = ResearchRuntime::new(reqwest::Client::new());
    let resolution = runtime.resolver().resolve(runtime.client()).await;
    let Some(vendor) = resolution.vendor else {
        anyhow::bail!(
            resolution
                .reason
                .unwrap_or_else(|| "no agent provider configured".to_string())
        );
    };
    let cfg = AgentVendorConfig::from_env(vendor)?;
    let model = cmd.model.unwrap_or_else(|| cfg.chat_model.clone());

    let mut messages = Vec::new();
    if let Some(system) = cmd.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(cmd.prompt));

    relay_chat_stream(runtime.client(), &cfg, &model, &messages, |delta| {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    })
    .await?;
    println!();
    Ok(())
}

async fn run_doctor(_cmd: DoctorCmd) -> Result<()> {
    let t0 = Instant::now();
    let runtime = ResearchRuntime::new(reqwest::Client::new());
    let resolution = runtime.resolver().resolve(runtime.client()).await;

    let mut payload = serde_json::json!({
        "ok": true,
        "search": {
            "configured": search::is_configured(),
            "endpoint": search::endpoint(),
        },
        "deep_research": {
            "configured": deep_research::is_configured(),
            "base_url": deep_research::base_url(),
            "model": deep_research::configured_model(),
        },
        "agent": {
            "provider": resolution.vendor.map(|v| v.as_str()),
            "reason": resolution.reason,
        },
    });
    add_envelope_fields(&mut payload, "doctor", t0.elapsed().as_millis());
    emit(&payload, None)
}

fn run_version(_cmd: VersionCmd) -> Result<()> {
    let payload = serde_json::json!({
        "name": "briefpipe",
        "version": env!("CARGO_PKG_VERSION"),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
