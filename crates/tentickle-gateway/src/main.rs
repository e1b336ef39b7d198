//! `tentickled` — the gateway daemon binary (spec §4.2, §6). Loads config,
//! constructs the store/memory/engine stack behind a single default `App`,
//! and serves all three transports (in-process via Axum state, Unix
//! socket, WebSocket) until SIGTERM triggers a bounded drain.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;
mod daemon;
mod error;
mod gateway;
mod http;
mod plugin;
mod unix;
mod ws;

use app::App;
use gateway::Gateway;
use tentickle_core::config::TentickleConfig;
use tentickle_engine::anthropic::AnthropicProvider;
use tentickle_engine::config::ToolUseContinuation;
use tentickle_engine::grounding::WorkspaceFilesGrounding;
use tentickle_engine::model::ModelClient;
use tentickle_engine::openai::OpenAiProvider;
use tentickle_engine::tools::{ExecTool, MemoryRecallTool, MemoryRememberTool, ReadFileTool, SpawnTool, Tool};
use tentickle_engine::ExecutionConfig;
use tentickle_memory::embedding::{EmbeddingClient, HttpEmbeddingClient};
use tentickle_memory::manager::MemoryConfig as MemoryManagerConfig;
use tentickle_memory::MemoryManager;
use tentickle_scheduler::{JobStore, Scheduler, TriggerWatcher};
use tentickle_store::Store;

#[derive(Parser, Debug)]
#[command(name = "tentickled", about = "tentickle gateway daemon")]
struct Cli {
    /// Path to the TOML config file. Defaults to `~/.tentickle/tentickle.toml`.
    #[arg(long)]
    config: Option<String>,
    /// Unused by this binary directly — the `tentickle` CLI decides whether
    /// to exec this daemon attached to the terminal or detached; backgrounding
    /// itself is out of scope here (spec §1 Non-goals: daemon fork scaffolding).
    #[arg(long)]
    foreground: bool,
    /// Override `gateway.port` from the config file.
    #[arg(long)]
    port: Option<u16>,
    /// Name of the default App (spec §4.2). Defaults to "default".
    #[arg(long, default_value = "default")]
    agent: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = cli.foreground;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tentickle_gateway=info,tower_http=info".into()),
        )
        .init();

    let mut config = TentickleConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        TentickleConfig::default()
    });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let data_dir = tentickle_core::config::data_dir();
    let pid_path = PathBuf::from(&data_dir).join("daemon.pid");
    let socket_path = config
        .gateway
        .socket_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&data_dir).join("daemon.sock"));

    let guard = match daemon::acquire(&data_dir, &pid_path, &socket_path) {
        Ok(guard) => guard,
        Err(e) => {
            error!(error = %e, "failed to acquire daemon run slot");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, &cli.agent, &socket_path).await {
        error!(error = %e, "gateway exited with error");
        guard.remove();
        std::process::exit(1);
    }

    guard.remove();
    Ok(())
}

async fn run(config: TentickleConfig, agent_name: &str, socket_path: &PathBuf) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.database.path)?);

    let model: Arc<dyn ModelClient> = match (&config.providers.anthropic, &config.providers.openai) {
        (Some(cfg), _) => Arc::new(AnthropicProvider::new(cfg.api_key.clone(), Some(cfg.base_url.clone()))),
        (None, Some(cfg)) => Arc::new(OpenAiProvider::new(cfg.api_key.clone(), Some(cfg.base_url.clone()))),
        (None, None) => {
            warn!("no model provider configured; falling back to an Anthropic client with an empty key");
            Arc::new(AnthropicProvider::new(String::new(), None))
        }
    };

    let workspace_root = PathBuf::from(&tentickle_core::config::data_dir())
        .join("workspaces")
        .join(agent_name);
    std::fs::create_dir_all(&workspace_root)?;

    let mem_config = MemoryManagerConfig {
        vector_dim: config.memory.vector_dim,
        dedup_threshold: config.memory.dedup_threshold,
        decay_lambda: config.memory.decay_lambda,
        backfill_batch_size: config.memory.backfill_batch,
        ..MemoryManagerConfig::default()
    };
    let memory_conn = rusqlite::Connection::open(&config.database.path)?;
    let embedder: Option<Arc<dyn EmbeddingClient>> = if config.memory.vector_search_enabled {
        Some(Arc::new(HttpEmbeddingClient::new("http://localhost:11434", "nomic-embed-text")))
    } else {
        None
    };
    let memory = Some(Arc::new(MemoryManager::new(memory_conn, embedder, mem_config)?));

    let exec_config = Arc::new(ExecutionConfig {
        model_name: config.agent.model.clone(),
        model,
        max_tokens: 4096,
        max_ticks: config.agent.max_ticks,
        grounding: vec![Arc::new(WorkspaceFilesGrounding::new(workspace_root.clone()))],
        tools: vec![
            Arc::new(ExecTool) as Arc<dyn Tool>,
            Arc::new(ReadFileTool),
            Arc::new(MemoryRememberTool),
            Arc::new(MemoryRecallTool),
            Arc::new(SpawnTool),
        ],
        continuation: Arc::new(ToolUseContinuation),
    });

    let owner = app::default_owner(agent_name);
    app::ensure_owner_entity(&store, &owner)?;

    let app = App::new(
        agent_name,
        store.clone(),
        exec_config,
        workspace_root,
        memory,
        owner.id.to_string(),
    );

    let auth = config.gateway.auth.clone();
    let gateway = Gateway::new(store.clone(), agent_name, auth);
    gateway.register_app(app);

    let jobs_dir = PathBuf::from(&config.scheduler.jobs_dir);
    let triggers_dir = PathBuf::from(&config.scheduler.triggers_dir);
    let job_store = Arc::new(JobStore::open(&jobs_dir)?);
    let scheduler = Arc::new(Scheduler::new(job_store.clone(), &triggers_dir)?);
    tokio::spawn(scheduler.run());

    let cancel = CancellationToken::new();
    let trigger_watcher = Arc::new(TriggerWatcher::new(
        &triggers_dir,
        job_store,
        gateway.clone(),
        config.scheduler.default_target.clone(),
    )?);
    tokio::spawn(trigger_watcher.run(cancel.clone()));

    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let unix_listener = tokio::net::UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    let unix_task = tokio::spawn(unix::serve(unix_listener, gateway.clone(), cancel.clone()));

    let router = Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/ws", get(ws::connection::ws_handler))
        .with_state(gateway.clone());

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let tcp_listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, socket = %socket_path.display(), git_sha = env!("TENTICKLE_GIT_SHA"), "tentickle gateway listening");

    let axum_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move { axum_cancel.cancelled().await })
            .await
    });

    daemon::wait_for_shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    let drain_gateway = gateway.clone();
    daemon::bounded_drain(async move {
        drain_gateway.stop_all();
        let _ = unix_task.await;
        let _ = server.await;
    })
    .await;

    Ok(())
}
