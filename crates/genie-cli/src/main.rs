use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use genie_core::matcher::fetch_options;
use genie_core::{
    BuiltinCatalog, Conversation, History, OptionAdvisor, OptionCatalog, Orchestrator,
    PageFetcher, PolicyConfig, ReplyGenerator, TemplateAdvisor, TemplateReplyGenerator,
    TurnResult,
};
use genie_local::advice::LlmOptionAdvisor;
use genie_local::catalog::JsonFileCatalog;
use genie_local::llm::{language_model_from_env, LlmBackend};
use genie_local::reply::LlmReplyGenerator;
use genie_local::research::ResearchPipeline;
use genie_local::{FsCache, LocalFetcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "genie")]
#[command(about = "Japa Genie visa coach: dialogue engine with option matching and web research", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct GlobalArgs {
    /// Which language model backs extraction, synthesis and replies.
    #[arg(long, global = true, value_enum, env = "GENIE_LLM_BACKEND", default_value = "auto")]
    llm_backend: BackendArg,
    /// Model name override for the selected backend.
    #[arg(long, global = true, env = "GENIE_LLM_MODEL")]
    llm_model: Option<String>,
    /// JSON file with the visa option catalog (defaults to the built-in catalog).
    #[arg(long, global = true, env = "GENIE_CATALOG")]
    catalog: Option<PathBuf>,
    /// JSON file overriding turn-policy keywords and thresholds.
    #[arg(long, global = true, env = "GENIE_POLICY")]
    policy: Option<PathBuf>,
    /// Cache fetched pages (in GENIE_CACHE_DIR, or the user cache directory).
    #[arg(long, global = true, env = "GENIE_CACHE")]
    cache: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BackendArg {
    Auto,
    #[value(name = "openai_compat")]
    OpenAiCompat,
    Ollama,
    None,
}

impl From<BackendArg> for LlmBackend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Auto => LlmBackend::Auto,
            BackendArg::OpenAiCompat => LlmBackend::OpenAiCompat,
            BackendArg::Ollama => LlmBackend::Ollama,
            BackendArg::None => LlmBackend::None,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive conversation on stdin/stdout.
    Chat(ChatCmd),
    /// Run one turn and print the turn result (json).
    Ask(AskCmd),
    /// Run the research pipeline for a query.
    Research(ResearchCmd),
    /// Match catalog options against a budget and background.
    Match(MatchCmd),
    /// Run the page extractor on one URL.
    Extract(ExtractCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    /// Load the conversation from this file if it exists and save it after every turn.
    #[arg(long)]
    conversation: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// The user's message.
    message: String,
    /// JSON array of prior turns (`[{"role":"user","text":"..."}, ...]`).
    #[arg(long, conflicts_with = "conversation")]
    history: Option<PathBuf>,
    /// Conversation file (history plus emitted results); updated after the turn.
    #[arg(long)]
    conversation: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    query: String,
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct MatchCmd {
    /// Budget in USD.
    #[arg(long)]
    budget: f64,
    /// Free-text education/work background.
    #[arg(long)]
    background: String,
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct ExtractCmd {
    #[arg(long)]
    url: String,
    /// What to look for on the page.
    #[arg(long)]
    goal: String,
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    #[arg(long, value_enum, default_value = "json")]
    output: OutputFormat,
}

/// Opt-in env file (`GENIE_ENV_FILE`). Never overrides variables already set and never
/// logs values.
fn load_env_file() {
    let Some(p) = std::env::var("GENIE_ENV_FILE")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        return;
    };
    let Ok(txt) = std::fs::read_to_string(&p) else {
        eprintln!("genie: could not read GENIE_ENV_FILE {p}");
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let s = s.strip_prefix("export ").unwrap_or(s);
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("genie=info,genie_local=info,genie_core=info")
    });
    // stderr keeps stdout machine-readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("genie")
        .join("pages")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Collaborators built once per process and shared by every turn.
struct App {
    orchestrator: Orchestrator,
    research: Arc<ResearchPipeline>,
    llm_name: Option<&'static str>,
}

fn load_policy(path: Option<&Path>) -> Result<PolicyConfig> {
    match path {
        None => Ok(PolicyConfig::default()),
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("read policy file {}", p.display()))?;
            Ok(PolicyConfig::from_json(&raw)?)
        }
    }
}

fn build_catalog(path: Option<&Path>) -> Arc<dyn OptionCatalog> {
    match path {
        Some(p) => Arc::new(JsonFileCatalog::new(p)),
        None => Arc::new(BuiltinCatalog),
    }
}

fn build_fetcher(global: &GlobalArgs) -> Result<LocalFetcher> {
    let fetcher = LocalFetcher::from_env()?;
    if global.cache && fetcher.cache().is_none() {
        return Ok(fetcher.with_cache(FsCache::new(default_cache_dir(), Some(86_400))));
    }
    Ok(fetcher)
}

impl App {
    fn build(global: &GlobalArgs) -> Result<Self> {
        let policy = load_policy(global.policy.as_deref())?;
        let client = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        let llm = language_model_from_env(client, global.llm_backend.into(), global.llm_model.clone())?;
        let llm_name = llm.as_ref().map(|l| l.name());
        tracing::info!(backend = llm_name.unwrap_or("none"), "language model selected");

        let fetcher: Arc<dyn PageFetcher> = Arc::new(build_fetcher(global)?);
        let research = Arc::new(ResearchPipeline::for_model(fetcher, llm.clone()));
        let (replies, advisor): (Arc<dyn ReplyGenerator>, Arc<dyn OptionAdvisor>) = match llm {
            Some(l) => (
                Arc::new(LlmReplyGenerator::new(l.clone())),
                Arc::new(LlmOptionAdvisor::new(l)),
            ),
            None => (Arc::new(TemplateReplyGenerator), Arc::new(TemplateAdvisor)),
        };
        let catalog = build_catalog(global.catalog.as_deref());
        let orchestrator = Orchestrator::new(catalog, research.clone(), replies)
            .with_advisor(advisor)
            .with_policy(policy);
        Ok(Self {
            orchestrator,
            research,
            llm_name,
        })
    }
}

fn read_conversation(path: &Path) -> Result<Conversation> {
    if !path.exists() {
        return Ok(Conversation::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read conversation {}", path.display()))?;
    let c: Conversation = serde_json::from_str(&raw)
        .with_context(|| format!("parse conversation {}", path.display()))?;
    c.validate()?;
    Ok(c)
}

fn write_conversation(path: &Path, c: &Conversation) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(c)?)
        .with_context(|| format!("write conversation {}", path.display()))
}

fn render_turn_text(r: &TurnResult) -> String {
    let mut out = r.reply.clone();
    if !r.options.is_empty() {
        out.push_str("\n\nVisa options:");
        for (i, o) in r.options.iter().enumerate() {
            out.push_str(&format!(
                "\n  {}. {} (${:.0}, {}, success rate {:.0}%)",
                i + 1,
                o.name,
                o.cost_usd,
                o.processing_time,
                o.success_rate_percent
            ));
            if let Some(reason) = &o.reason {
                out.push_str(&format!("\n     {reason}"));
            }
        }
    }
    if let Some(ctx) = &r.research_context {
        out.push_str("\n\nResearch findings:\n  ");
        out.push_str(ctx);
    }
    out
}

async fn run_chat(app: &App, args: ChatCmd) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut conv = match &args.conversation {
        Some(p) => read_conversation(p)?,
        None => Conversation::new(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Japa Genie (type 'exit' to quit)\n> ")
        .await?;
    stdout.flush().await?;
    while let Some(line) = lines.next_line().await? {
        let msg = line.trim();
        if msg.eq_ignore_ascii_case("exit") || msg.eq_ignore_ascii_case("quit") {
            break;
        }
        if !msg.is_empty() {
            let r = app.orchestrator.turn(&mut conv, msg).await;
            if let Some(p) = &args.conversation {
                write_conversation(p, &conv)?;
            }
            stdout
                .write_all(format!("\n{}\n\n", render_turn_text(&r)).as_bytes())
                .await?;
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn run_ask(app: &App, args: AskCmd) -> Result<()> {
    let mut conv = if let Some(p) = &args.history {
        let raw = std::fs::read_to_string(p)
            .with_context(|| format!("read history {}", p.display()))?;
        let h: History = serde_json::from_str(&raw)
            .with_context(|| format!("parse history {}", p.display()))?;
        Conversation::from_history(h)
    } else if let Some(p) = &args.conversation {
        read_conversation(p)?
    } else {
        Conversation::new()
    };
    let r = app.orchestrator.turn(&mut conv, &args.message).await;
    if let Some(p) = &args.conversation {
        write_conversation(p, &conv)?;
    }
    match args.output {
        OutputFormat::Json => print_json(&r)?,
        OutputFormat::Text => println!("{}", render_turn_text(&r)),
    }
    Ok(())
}

async fn run_research(app: &App, args: ResearchCmd) -> Result<()> {
    let (outcome, extractions) = app.research.run(&args.query).await;
    let tool_output = outcome.to_tool_output(&args.query);
    match args.output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "query": args.query,
            "outcome": outcome,
            "toolOutput": tool_output,
            "extractions": extractions,
        }))?,
        OutputFormat::Text => {
            println!("{}", tool_output.analysis_summary);
            for u in tool_output.source_urls_used.unwrap_or_default() {
                println!("  source: {u}");
            }
        }
    }
    Ok(())
}

fn run_match(catalog: &dyn OptionCatalog, args: MatchCmd) -> Result<()> {
    let options = fetch_options(catalog, args.budget, &args.background);
    match args.output {
        OutputFormat::Json => print_json(&options)?,
        OutputFormat::Text => {
            if options.is_empty() {
                println!("No matching options.");
            }
            for o in &options {
                println!("{} (${:.0})", o.name, o.cost_usd);
            }
        }
    }
    Ok(())
}

async fn run_extract(app: &App, args: ExtractCmd) -> Result<()> {
    let e = app.research.extractor().extract(&args.url, &args.goal).await;
    match args.output {
        OutputFormat::Json => print_json(&e)?,
        OutputFormat::Text => println!("{}\n\n(source: {})", e.text, e.source_url),
    }
    Ok(())
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

fn run_doctor(global: &GlobalArgs, args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let policy_ok = load_policy(global.policy.as_deref());
    checks.push(serde_json::json!({
        "name": "policy_loads",
        "ok": policy_ok.is_ok(),
        "error": policy_ok.as_ref().err().map(|e| e.to_string()),
    }));

    let catalog = build_catalog(global.catalog.as_deref());
    let catalog_ok = catalog.options();
    checks.push(serde_json::json!({
        "name": "catalog_loads",
        "ok": catalog_ok.is_ok(),
        "options": catalog_ok.as_ref().map(|o| o.len()).unwrap_or(0),
        "error": catalog_ok.as_ref().err().map(|e| e.to_string()),
    }));

    let cache_dir = env_path("GENIE_CACHE_DIR").or_else(|| global.cache.then(default_cache_dir));
    if let Some(dir) = &cache_dir {
        let ok = (|| -> Result<()> {
            std::fs::create_dir_all(dir)?;
            let marker = dir.join("genie-doctor.marker");
            std::fs::write(&marker, b"ok")?;
            let _ = std::fs::remove_file(&marker);
            Ok(())
        })()
        .is_ok();
        let hint = (!ok).then_some("Set GENIE_CACHE_DIR to a writable directory.");
        checks.push(serde_json::json!({
            "name": "cache_dir_writable",
            "ok": ok,
            "hint": hint,
        }));
    }

    let backend: LlmBackend = global.llm_backend.into();
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "name": "genie",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis() as u64,
        "configured": {
            "llm_backend": backend.as_str(),
            "llm": {
                "openai_compat": has_env("GENIE_OPENAI_COMPAT_BASE_URL"),
                "openai_compat_api_key": has_env("GENIE_OPENAI_COMPAT_API_KEY"),
                "ollama": has_env("GENIE_OLLAMA_ENABLE"),
            },
            "cache_dir": cache_dir.as_ref().map(|p| p.display().to_string()),
            "catalog": global.catalog.as_ref().map(|p| p.display().to_string()),
            "policy": global.policy.as_ref().map(|p| p.display().to_string()),
            "env_file": has_env("GENIE_ENV_FILE"),
        },
        "checks": checks,
    });
    match args.output {
        OutputFormat::Json => print_json(&v)?,
        OutputFormat::Text => {
            println!("genie {} (llm backend: {})", env!("CARGO_PKG_VERSION"), backend.as_str());
            for c in &checks {
                println!(
                    "  [{}] {}",
                    if c["ok"].as_bool() == Some(true) { "ok" } else { "FAIL" },
                    c["name"].as_str().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Version(args) => match args.output {
            OutputFormat::Text => println!("genie {}", env!("CARGO_PKG_VERSION")),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "schema_version": 1,
                    "kind": "version",
                    "ok": true,
                    "name": "genie",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            ),
        },
        Commands::Doctor(args) => run_doctor(&cli.global, args)?,
        Commands::Match(args) => {
            let catalog = build_catalog(cli.global.catalog.as_deref());
            run_match(catalog.as_ref(), args)?
        }
        Commands::Chat(args) => {
            let app = App::build(&cli.global)?;
            tracing::debug!(llm = ?app.llm_name, "chat started");
            run_chat(&app, args).await?
        }
        Commands::Ask(args) => run_ask(&App::build(&cli.global)?, args).await?,
        Commands::Research(args) => run_research(&App::build(&cli.global)?, args).await?,
        Commands::Extract(args) => run_extract(&App::build(&cli.global)?, args).await?,
    }
    Ok(())
}
