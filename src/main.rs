use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use voice_calling::orchestrator::{DEFAULT_MAX_DURATION_SECS, DEFAULT_TEMPLATE};
use voice_calling::{
    CallOrchestrator, CallRequest, Config, ContextValue, TemplateCatalog, WebhookRelay,
};

/// Interval between status polls while waiting for a call to end
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Status polls before giving up on a call
const MAX_POLL_ATTEMPTS: u32 = 60;

/// Voice Calling - place AI phone calls through Vapi
#[derive(Parser)]
#[command(name = "voice-calling", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook relay until interrupted
    Serve,
    /// Place an outbound call
    Call {
        /// Destination number in E.164 (e.g. +81-90-1234-5678)
        #[arg(short, long)]
        phone: String,
        /// Call script template
        #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
        template: String,
        /// Template variable as key=value; repeatable
        #[arg(short, long = "context", value_parser = parse_var)]
        context: Vec<(String, String)>,
        /// Maximum call length in seconds
        #[arg(long, default_value_t = DEFAULT_MAX_DURATION_SECS)]
        max_duration: u32,
        /// Wait for the call to end and print its results
        #[arg(short, long)]
        wait: bool,
    },
    /// Show live call status
    Status {
        /// Vapi call ID
        call_id: String,
    },
    /// Show the call transcript
    Transcript {
        /// Vapi call ID
        call_id: String,
    },
    /// Show data extracted from the call
    Data {
        /// Vapi call ID
        call_id: String,
    },
    /// List recent calls
    List {
        /// Maximum number of calls
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// List available templates
    Templates,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voice_calling=info",
        1 => "info,voice_calling=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env loaded: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Call {
            phone,
            template,
            context,
            max_duration,
            wait,
        } => {
            let mut request = CallRequest::new(phone)
                .template(template)
                .max_duration(max_duration);
            for (key, value) in context {
                request = request.var(key, context_value(value));
            }
            cmd_call(&config, request, wait).await
        }
        Command::Status { call_id } => {
            let orchestrator = CallOrchestrator::from_config(&config)?;
            print_json(&orchestrator.get_call_status(&call_id).await?)
        }
        Command::Transcript { call_id } => {
            let orchestrator = CallOrchestrator::from_config(&config)?;
            print_json(&orchestrator.get_transcript(&call_id).await?)
        }
        Command::Data { call_id } => {
            let orchestrator = CallOrchestrator::from_config(&config)?;
            print_json(&orchestrator.get_structured_data(&call_id).await?)
        }
        Command::List { limit } => {
            let orchestrator = CallOrchestrator::from_config(&config)?;
            let mut query = BTreeMap::new();
            query.insert("limit".to_string(), limit.to_string());
            print_json(&orchestrator.list_calls(&query).await?)
        }
        Command::Templates => {
            let catalog = TemplateCatalog::new(&config.templates_dir);
            tracing::debug!(dir = %catalog.dir().display(), "listing templates");
            for name in catalog.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Run the relay with the orchestrator's handlers until Ctrl-C
async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    if !config.server_mode() {
        tracing::warn!("WEBHOOK_URL is unset or local: Vapi will not be able to reach this relay");
    }

    let orchestrator = Arc::new(CallOrchestrator::from_config(config)?);
    let relay = WebhookRelay::from_config(&config.webhook);
    orchestrator.attach(relay.bus());
    let running = relay.start().await?;

    tracing::info!(
        addr = %running.local_addr(),
        "voice calling relay ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    running.stop().await?;
    Ok(())
}

async fn cmd_call(config: &Config, request: CallRequest, wait: bool) -> anyhow::Result<()> {
    let orchestrator = Arc::new(CallOrchestrator::from_config(config)?);
    let relay = orchestrator.initialize(config).await?;

    let placement = orchestrator.make_call(request).await?;
    print_json(&placement)?;

    if wait {
        wait_for_call(&orchestrator, &placement.call_id).await?;
    }

    if let Some(relay) = relay {
        relay.stop().await?;
    }
    Ok(())
}

/// Poll until the provider reports the call ended, then print results
async fn wait_for_call(orchestrator: &CallOrchestrator, call_id: &str) -> anyhow::Result<()> {
    for attempt in 1..=MAX_POLL_ATTEMPTS {
        tokio::time::sleep(POLL_INTERVAL).await;

        let status = orchestrator.get_call_status(call_id).await?;
        tracing::info!(call_id, attempt, status = ?status.status, "polled call status");

        if status.status.as_deref() == Some("ended") {
            print_json(&status)?;
            match orchestrator.get_transcript(call_id).await {
                Ok(transcript) => print_json(&transcript)?,
                Err(e) if e.is_retryable_later() => println!("{e}"),
                Err(e) => return Err(e.into()),
            }
            match orchestrator.get_structured_data(call_id).await {
                Ok(data) => print_json(&data)?,
                Err(e) if e.is_retryable_later() => println!("{e}"),
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
    }

    anyhow::bail!("call {call_id} did not end after {MAX_POLL_ATTEMPTS} status checks")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a `key=value` pair
fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Integers are passed as numbers, everything else as text
fn context_value(raw: String) -> ContextValue {
    raw.parse::<i64>()
        .map_or_else(|_| ContextValue::Text(raw), ContextValue::from)
}
