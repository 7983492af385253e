use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use grok_core::agent::{Agent, AgentConfig, AgentEvent, PlanApproval};
use grok_core::conversation::Thread;
use grok_core::history::OperationHistory;
use grok_core::metrics::MetricsRecorder;
use grok_core::pools::Pools;
use grok_core::tools::{default_registry, ToolContext};
use grok_engine::{CodeIntelligenceEngine, EngineConfig};
use grok_provider::{GrokProvider, Provider};

#[derive(Parser)]
#[command(name = "grok", about = "AI coding agent for the terminal", version)]
struct Cli {
    /// Run a single prompt non-interactively and exit
    #[arg(long)]
    prompt: Option<String>,

    /// Model to use (overrides settings)
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature (overrides settings)
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum response tokens (overrides settings)
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Verbose logging plus a tool-metrics summary at exit
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_root = std::env::current_dir().context("cannot determine working directory")?;
    let mut settings = grok_config::Settings::load(&project_root);
    if let Some(model) = cli.model.clone() {
        settings.default_model = Some(model);
    }
    if let Some(temperature) = cli.temperature {
        settings.temperature = Some(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        settings.max_tokens = Some(max_tokens);
    }

    let provider = Arc::new(
        GrokProvider::from_settings(&settings).context("provider initialization failed")?,
    );

    let engine = Arc::new(
        CodeIntelligenceEngine::new(EngineConfig::new(&project_root))
            .context("engine initialization failed")?,
    );
    {
        // Index in the background; tools report "not ready" until it lands.
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.initialize().await {
                tracing::error!("code intelligence engine failed to initialize: {e:#}");
            }
        });
    }

    let pools = Pools::initialize();
    let metrics = Arc::new(MetricsRecorder::new());
    let ctx = ToolContext {
        session_id: uuid_like_session_id(),
        cwd: project_root.clone(),
        project_root: project_root.clone(),
        engine: Some(engine.clone()),
        pools: pools.clone(),
        metrics: metrics.clone(),
        history: Arc::new(OperationHistory::new(&project_root)),
    };

    let registry = Arc::new(default_registry());
    let mut agent_config = AgentConfig::from_settings(&settings);
    if agent_config.model.is_empty() {
        agent_config.model = provider.default_model().to_string();
    }
    let agent = Agent::new(provider, registry, agent_config, ctx);

    let result = match cli.prompt {
        Some(prompt) => run_once(&agent, &prompt).await,
        None => run_interactive(&agent).await,
    };

    if cli.verbose {
        eprintln!("\n{}", metrics.render_summary());
        eprintln!("metrics log: {}", metrics.log_path().display());
    }

    engine.dispose();
    pools.dispose();
    result
}

fn uuid_like_session_id() -> String {
    format!(
        "session-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    )
}

/// Prints the plan preview and asks on the terminal.
struct TerminalApproval;

#[async_trait::async_trait]
impl PlanApproval for TerminalApproval {
    async fn confirm(&self, _plan: &grok_core::planner::TaskPlan, preview: &str) -> bool {
        println!("\n{preview}");
        print!("Execute this plan? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        if reader.read_line(&mut line).await.is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// One-shot mode never prompts; plans run unattended.
struct HeadlessApproval;

#[async_trait::async_trait]
impl PlanApproval for HeadlessApproval {
    async fn confirm(&self, _plan: &grok_core::planner::TaskPlan, preview: &str) -> bool {
        println!("\n{preview}");
        true
    }
}

async fn run_once(agent: &Agent, prompt: &str) -> Result<()> {
    let mut thread = Thread::new();
    run_and_print(agent, &mut thread, prompt, &HeadlessApproval).await
}

async fn run_interactive(agent: &Agent) -> Result<()> {
    println!("grok: type a request, or `exit` to quit.");
    let mut thread = Thread::new();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }
        if let Err(e) = run_and_print(agent, &mut thread, input, &TerminalApproval).await {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}

async fn run_and_print(
    agent: &Agent,
    thread: &mut Thread,
    input: &str,
    approval: &dyn PlanApproval,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Content(text) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCall { name, args, .. } => {
                    eprintln!("\n→ {name} {}", compact(&args));
                }
                AgentEvent::ToolResult { name, outcome, .. } => {
                    if outcome.success {
                        eprintln!("✓ {name}");
                    } else {
                        eprintln!("✗ {name}: {}", outcome.error.as_deref().unwrap_or("failed"));
                    }
                }
                AgentEvent::PlanGenerated { .. } => {}
                AgentEvent::PlanConfirmed { approved, .. } => {
                    eprintln!("plan {}", if approved { "approved" } else { "declined" });
                }
                AgentEvent::PlanProgress {
                    completed,
                    total,
                    current_step,
                    ..
                } => eprintln!("[{completed}/{total}] {current_step}"),
                AgentEvent::PlanStepStarted { description, .. } => {
                    eprintln!("… {description}");
                }
                AgentEvent::PlanStepCompleted {
                    step_id,
                    duration_ms,
                    ..
                } => eprintln!("✓ {step_id} ({duration_ms}ms)"),
                AgentEvent::PlanStepFailed { step_id, error } => {
                    eprintln!("✗ {step_id}: {error}");
                }
                AgentEvent::CorrectionAttempt {
                    tool,
                    attempt,
                    max_attempts,
                    ..
                } => eprintln!("retrying after {tool} failure ({attempt}/{max_attempts})"),
                AgentEvent::CorrectionFailed { tool, attempts } => {
                    eprintln!("{tool} still failing after {attempts} corrections");
                }
                AgentEvent::Error(message) => eprintln!("! {message}"),
                AgentEvent::Done => {
                    println!();
                    break;
                }
            }
        }
    });

    let result = agent
        .run_turn(thread, input, &tx, approval, &cancel)
        .await;
    drop(tx);
    let _ = printer.await;
    result
}

fn compact(args: &serde_json::Value) -> String {
    let text = args.to_string();
    if text.len() > 120 {
        let mut end = 120;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    } else {
        text
    }
}
