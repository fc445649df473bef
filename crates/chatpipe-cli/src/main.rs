use anyhow::{Context, Result};
use chatpipe::core::{ChatTurn, Error as CoreError, Role, StreamChunk, TurnOutcome};
use chatpipe::docs_server;
use chatpipe::local::{
    classify::{classify, search_template, SEARCH_TEMPLATES},
    config::AppConfig,
    conversation::Conversation,
    default_http_client,
    local_search::LocalSearchClient,
    openai_compat::{ModelClient, Sampling},
    research::Researcher,
    search::provider_from_env,
    LocalFetcher,
};
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chatpipe")]
#[command(
    about = "Chat with a local OpenAI-compatible model server, with @web research",
    long_about = None
)]
struct Cli {
    /// Config file (default: $CHATPIPE_CONFIG, else <config dir>/chatpipe/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Model server base URL for this run (overrides config and $CHATPIPE_SERVER_URL).
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message and print the reply. Prefix with `@web` for web research.
    Chat(ChatCmd),
    /// Interactive chat. Ctrl-C aborts the reply in progress; Ctrl-D exits.
    Repl(ReplCmd),
    /// List models offered by the server (json).
    Models(OutputCmd),
    /// Check that a model answers a one-token completion (json).
    Probe(ProbeCmd),
    /// Show or edit the saved configuration.
    #[command(subcommand)]
    Config(ConfigCmd),
    /// Search local documents through the document search server (json).
    DocsSearch(DocsSearchCmd),
    /// Run the local document search server.
    DocsServe(DocsServeCmd),
    /// Diagnose configuration and connectivity (json; no secrets).
    Doctor(OutputCmd),
    /// Print version info.
    Version(OutputCmd),
}

#[derive(clap::Args, Debug)]
struct OutputCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct SamplingArgs {
    /// Sampling temperature (default 0.3).
    #[arg(long)]
    temperature: Option<f64>,
    /// Completion token cap (default 2000).
    #[arg(long)]
    max_tokens: Option<u64>,
}

impl SamplingArgs {
    fn apply(self, model: ModelClient) -> ModelClient {
        let mut s = Sampling::default();
        if let Some(t) = self.temperature {
            s.temperature = t;
        }
        if let Some(n) = self.max_tokens {
            s.max_tokens = n;
        }
        model.with_sampling(s)
    }
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    /// Message text (the subject when --template is given).
    #[arg(required = true)]
    message: Vec<String>,
    /// Model id (default: last used, else the server's first model).
    #[arg(long)]
    model: Option<String>,
    /// Wrap the message in a research template: social | person | deep.
    #[arg(long)]
    template: Option<String>,
    #[command(flatten)]
    sampling: SamplingArgs,
    /// Output format: json|text (text streams the reply as it arrives)
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ReplCmd {
    /// Model id (default: last used, else the server's first model).
    #[arg(long)]
    model: Option<String>,
    #[command(flatten)]
    sampling: SamplingArgs,
}

#[derive(clap::Args, Debug)]
struct ProbeCmd {
    /// Model id to probe.
    model: String,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration (json).
    Show,
    /// Set the model server URL and remember it in the history.
    SetServer { url: String },
    /// Restore the default server URL and history.
    ResetServer,
    /// Add a directory to the local document search roots.
    AddPath { path: String },
    /// Remove a directory from the local document search roots.
    RemovePath { path: String },
    /// Allow a file extension in local document search (e.g. `md`; `""` admits all files).
    AddType { ext: String },
    /// Disallow a file extension in local document search.
    RemoveType { ext: String },
}

#[derive(clap::Args, Debug)]
struct DocsSearchCmd {
    /// Query text.
    #[arg(required = true)]
    query: Vec<String>,
    /// Search API base (default: from config).
    #[arg(long)]
    api_base: Option<String>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DocsServeCmd {
    /// Address to listen on.
    #[arg(long, default_value = docs_server::DEFAULT_BIND)]
    bind: std::net::SocketAddr,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CHATPIPE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn is_text(output: &str) -> bool {
    output.eq_ignore_ascii_case("text")
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(p) => Ok(p.clone()),
        None => Ok(AppConfig::default_path()?),
    }
}

fn load_config(cli: &Cli) -> Result<(PathBuf, AppConfig)> {
    let path = config_path(cli)?;
    let mut cfg = AppConfig::load(&path)?.with_env_overrides();
    if let Some(url) = &cli.server {
        cfg.server_url = url.trim_end_matches('/').to_string();
    }
    Ok((path, cfg))
}

fn researcher(client: &reqwest::Client) -> Option<Researcher> {
    match provider_from_env(client.clone()) {
        Ok(search) => {
            tracing::debug!(provider = search.name(), "web research enabled");
            Some(Researcher::new(
                search,
                Arc::new(LocalFetcher::new(client.clone())),
            ))
        }
        Err(e) => {
            tracing::debug!(error = %e, "web research disabled");
            None
        }
    }
}

async fn resolve_model(model: &ModelClient, explicit: Option<String>, cfg: &AppConfig) -> Result<String> {
    if let Some(m) = explicit.or_else(|| cfg.last_model.clone()) {
        return Ok(m);
    }
    let models = model
        .list_models()
        .await
        .with_context(|| format!("no --model given and listing models at {} failed", model.base_url()))?;
    models
        .into_iter()
        .next()
        .map(|m| m.id)
        .ok_or_else(|| anyhow::anyhow!("the server at {} offers no models", model.base_url()))
}

/// Persist the model as last used. Reloads from disk so run-only overrides are not saved.
fn remember_model(path: &std::path::Path, model: &str) {
    let mut saved = match AppConfig::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "could not reload config to save last used model");
            return;
        }
    };
    if saved.last_model.as_deref() == Some(model) {
        return;
    }
    saved.last_model = Some(model.to_string());
    if let Err(e) = saved.save(path) {
        tracing::warn!(error = %e, "could not save last used model");
    }
}

/// Prints only the part of each accumulated chunk not yet on screen.
struct TextPrinter {
    printed: usize,
}

impl TextPrinter {
    fn new() -> Self {
        Self { printed: 0 }
    }

    fn emit(&mut self, chunk: &StreamChunk) {
        if let Some(tail) = chunk.content.get(self.printed..) {
            if !tail.is_empty() {
                print!("{tail}");
                let _ = std::io::stdout().flush();
                self.printed = chunk.content.len();
            }
        }
        if chunk.done {
            println!();
        }
    }
}

fn error_code(e: &CoreError) -> &'static str {
    match e {
        CoreError::NoResults => "no_results",
        CoreError::Search(_) | CoreError::Fetch(_) | CoreError::InvalidUrl(_) => "search_failed",
        CoreError::Stream(_) => "model_failed",
        CoreError::LocalSearch(_) => "local_search_failed",
        CoreError::Config(_) => "config",
        CoreError::NotConfigured(_) => "not_configured",
    }
}

fn apply_template(id: &str, subject: &str) -> Result<String> {
    match search_template(id) {
        Some(t) => Ok(t.fill(subject)),
        None => {
            let ids: Vec<&str> = SEARCH_TEMPLATES.iter().map(|t| t.id).collect();
            anyhow::bail!("unknown template {id:?} (expected one of: {})", ids.join(", "))
        }
    }
}

async fn run_chat(cli: &Cli, args: &ChatCmd) -> Result<ExitCode> {
    let text = match &args.template {
        Some(id) => apply_template(id, &args.message.join(" "))?,
        None => args.message.join(" "),
    };
    let (path, cfg) = load_config(cli)?;
    let client = default_http_client()?;
    let model = args
        .sampling
        .apply(ModelClient::new(client.clone(), cfg.server_url.clone()));
    let model_id = resolve_model(&model, args.model.clone(), &cfg).await?;
    let conv = Arc::new(Conversation::new(model, researcher(&client)));

    let ctrl_c = {
        let conv = conv.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                conv.abort();
            }
        })
    };

    let text_mode = is_text(&args.output);
    let mut printer = TextPrinter::new();
    let res = conv
        .submit(&text, &model_id, &mut |c: StreamChunk| {
            if text_mode {
                printer.emit(&c);
            }
        })
        .await;
    ctrl_c.abort();

    let mode = classify(&text).mode;
    let (ok, content) = match &res {
        Ok(outcome) => {
            remember_model(&path, &model_id);
            (true, outcome.content().to_string())
        }
        Err(_) => (
            false,
            conv.turns()
                .last()
                .map(|t| t.content.clone())
                .unwrap_or_default(),
        ),
    };

    if text_mode {
        if let Err(e) = &res {
            eprintln!("error: {}", e.user_message());
        }
    } else {
        let mut payload = serde_json::json!({
            "schema_version": 1,
            "kind": "chat",
            "ok": ok,
            "model": model_id,
            "server": cfg.server_url,
            "mode": mode,
            "status": match &res {
                Ok(TurnOutcome::Completed { .. }) => "completed",
                Ok(TurnOutcome::Aborted { .. }) => "aborted",
                Err(_) => "failed",
            },
            "content": content,
        });
        if let Err(e) = &res {
            payload["error"] = serde_json::json!({
                "code": error_code(e),
                "message": e.user_message(),
            });
        }
        println!("{payload}");
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_repl(cli: &Cli, args: &ReplCmd) -> Result<ExitCode> {
    use tokio::io::AsyncBufReadExt;

    let (path, cfg) = load_config(cli)?;
    let client = default_http_client()?;
    let model = args
        .sampling
        .apply(ModelClient::new(client.clone(), cfg.server_url.clone()));
    let model_id = resolve_model(&model, args.model.clone(), &cfg).await?;
    let conv = Arc::new(Conversation::new(model, researcher(&client)));

    // Ctrl-C aborts the reply in progress; at the prompt it exits.
    {
        let conv = conv.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !conv.abort() {
                    println!();
                    std::process::exit(130);
                }
            }
        });
    }

    eprintln!(
        "chatpipe {} | model {model_id} @ {} | /clear, /history, /templates, /exit",
        env!("CARGO_PKG_VERSION"),
        cfg.server_url
    );
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                conv.clear();
                continue;
            }
            "/history" => {
                for ChatTurn { role, content, .. } in conv.turns() {
                    let who = match role {
                        Role::User => "you",
                        Role::Assistant => "assistant",
                    };
                    println!("[{who}] {content}");
                }
                continue;
            }
            "/templates" => {
                for t in SEARCH_TEMPLATES {
                    println!("{:<7} {:<22} {}", t.id, t.label, t.example());
                }
                println!("use: /template <id> <subject>");
                continue;
            }
            _ => {}
        }

        let line = match line.strip_prefix("/template ") {
            Some(rest) => {
                let (id, subject) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
                if subject.trim().is_empty() {
                    eprintln!("usage: /template <id> <subject>");
                    continue;
                }
                match apply_template(id, subject) {
                    Ok(text) => {
                        eprintln!("{text}");
                        text
                    }
                    Err(e) => {
                        eprintln!("error: {e}");
                        continue;
                    }
                }
            }
            None => line.to_string(),
        };

        let mut printer = TextPrinter::new();
        match conv
            .submit(&line, &model_id, &mut |c: StreamChunk| printer.emit(&c))
            .await
        {
            Ok(TurnOutcome::Aborted { .. }) => eprintln!("(aborted)"),
            Ok(TurnOutcome::Completed { .. }) => remember_model(&path, &model_id),
            Err(e) => eprintln!("error: {}", e.user_message()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_models(cli: &Cli, args: &OutputCmd) -> Result<ExitCode> {
    let (_, cfg) = load_config(cli)?;
    let model = ModelClient::new(default_http_client()?, cfg.server_url.clone());
    let models = model.list_models().await?;
    if is_text(&args.output) {
        for m in &models {
            println!("{}", m.id);
        }
    } else {
        println!(
            "{}",
            serde_json::json!({
                "schema_version": 1,
                "kind": "models",
                "ok": true,
                "server": cfg.server_url,
                "models": models,
            })
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_probe(cli: &Cli, args: &ProbeCmd) -> Result<ExitCode> {
    let (_, cfg) = load_config(cli)?;
    let model = ModelClient::new(default_http_client()?, cfg.server_url.clone());
    let available = model.probe(&args.model).await;
    if is_text(&args.output) {
        println!(
            "{}: {}",
            args.model,
            if available { "available" } else { "unavailable" }
        );
    } else {
        println!(
            "{}",
            serde_json::json!({
                "schema_version": 1,
                "kind": "probe",
                "ok": true,
                "server": cfg.server_url,
                "model": args.model,
                "available": available,
            })
        );
    }
    Ok(if available { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn run_config(cli: &Cli, cmd: &ConfigCmd) -> Result<ExitCode> {
    let path = config_path(cli)?;
    let mut cfg = AppConfig::load(&path)?;
    let changed = match cmd {
        ConfigCmd::Show => {
            let effective = cfg.clone().with_env_overrides();
            println!(
                "{}",
                serde_json::json!({
                    "schema_version": 1,
                    "kind": "config",
                    "path": path.to_string_lossy(),
                    "config": effective,
                })
            );
            return Ok(ExitCode::SUCCESS);
        }
        ConfigCmd::SetServer { url } => {
            cfg.set_server_url(url)?;
            true
        }
        ConfigCmd::ResetServer => {
            cfg.reset_server();
            true
        }
        ConfigCmd::AddPath { path } => cfg.search.add_path(path),
        ConfigCmd::RemovePath { path } => cfg.search.remove_path(path),
        ConfigCmd::AddType { ext } => cfg.search.add_file_type(ext),
        ConfigCmd::RemoveType { ext } => cfg.search.remove_file_type(ext),
    };
    if changed {
        cfg.save(&path)?;
    }
    println!(
        "{}",
        serde_json::json!({
            "schema_version": 1,
            "kind": "config",
            "ok": true,
            "changed": changed,
            "path": path.to_string_lossy(),
            "config": cfg,
        })
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_docs_search(cli: &Cli, args: &DocsSearchCmd) -> Result<ExitCode> {
    let (_, cfg) = load_config(cli)?;
    let base = args
        .api_base
        .clone()
        .unwrap_or_else(|| cfg.local_search_url.clone());
    let client = LocalSearchClient::new(default_http_client()?, base);
    let query = args.query.join(" ");
    let hits = client.search(&query, &cfg.search).await?;
    if is_text(&args.output) {
        for h in &hits {
            println!("{:.2}\t{}\t{}", h.relevance_score, h.file_path, h.snippet);
        }
    } else {
        println!(
            "{}",
            serde_json::json!({
                "schema_version": 1,
                "kind": "docs_search",
                "ok": true,
                "query": query,
                "results": hits,
            })
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_doctor(cli: &Cli, args: &OutputCmd) -> Result<ExitCode> {
    let path = config_path(cli)?;
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let cfg = match AppConfig::load(&path) {
        Ok(c) => {
            checks.push(serde_json::json!({"name": "config_readable", "ok": true}));
            c
        }
        Err(e) => {
            checks.push(serde_json::json!({
                "name": "config_readable",
                "ok": false,
                "message": e.to_string(),
                "hint": "Fix or delete the config file; defaults are used when it is missing.",
            }));
            AppConfig::default()
        }
    }
    .with_env_overrides();
    let server_url = cli
        .server
        .clone()
        .unwrap_or_else(|| cfg.server_url.clone());

    let client = default_http_client()?;
    let model = ModelClient::new(client.clone(), server_url.clone());
    match model.list_models().await {
        Ok(models) => checks.push(serde_json::json!({
            "name": "model_server",
            "ok": !models.is_empty(),
            "models": models.len(),
            "hint": if models.is_empty() { "Load a model in the server." } else { "" },
        })),
        Err(e) => checks.push(serde_json::json!({
            "name": "model_server",
            "ok": false,
            "message": e.to_string(),
            "hint": "Start the model server or run `chatpipe config set-server <url>`.",
        })),
    }

    let provider = researcher(&client).map(|r| r.provider_name());
    checks.push(serde_json::json!({
        "name": "web_search",
        "ok": provider.is_some(),
        "provider": provider,
        "hint": if provider.is_some() { "" } else {
            "Set CHATPIPE_GOOGLE_API_KEY + CHATPIPE_GOOGLE_CX, or CHATPIPE_SEARXNG_ENDPOINT."
        },
    }));

    if cfg.search.search_paths.is_empty() {
        checks.push(serde_json::json!({
            "name": "docs_server",
            "ok": true,
            "skipped": true,
            "hint": "No search paths configured.",
        }));
    } else {
        let docs = LocalSearchClient::new(client, cfg.local_search_url.clone());
        let docs_ok = docs.is_running().await;
        checks.push(serde_json::json!({
            "name": "docs_server",
            "ok": docs_ok,
            "skipped": false,
            "hint": if docs_ok { "" } else { "Run `chatpipe docs-serve`." },
        }));
    }

    let ok = checks
        .iter()
        .filter(|c| !c["skipped"].as_bool().unwrap_or(false))
        .all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "chatpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "config_path": path.to_string_lossy(),
        "server": server_url,
        "checks": checks,
    });
    if is_text(&args.output) {
        println!("chatpipe {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
        println!("config: {}", path.display());
        println!("server: {server_url}");
        println!("checks:");
        if let Some(arr) = payload["checks"].as_array() {
            for c in arr {
                let name = c["name"].as_str().unwrap_or("?");
                if c["skipped"].as_bool().unwrap_or(false) {
                    println!("- {name}: skipped");
                } else {
                    let ok = c["ok"].as_bool().unwrap_or(false);
                    println!("- {name}: {}", if ok { "ok" } else { "fail" });
                }
            }
        }
    } else {
        println!("{payload}");
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Chat(args) => run_chat(&cli, args).await,
        Commands::Repl(args) => run_repl(&cli, args).await,
        Commands::Models(args) => run_models(&cli, args).await,
        Commands::Probe(args) => run_probe(&cli, args).await,
        Commands::Config(cmd) => run_config(&cli, cmd),
        Commands::DocsSearch(args) => run_docs_search(&cli, args).await,
        Commands::DocsServe(args) => {
            docs_server::serve(args.bind).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor(args) => run_doctor(&cli, args).await,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "chatpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            if is_text(&args.output) {
                println!("chatpipe {}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("{v}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
