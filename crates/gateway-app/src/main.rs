mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use mcp_gateway::config::store::{ConfigStore, FileConfigStore, FileWatchNotifier};
use mcp_gateway::http::AppState;
use mcp_gateway::reload::ReloadController;
use mcp_gateway::router::Router;
use mcp_gateway::session::local::LocalSessionStore;
use mcp_gateway::session::shared::SharedSessionStore;
use mcp_gateway::session::SessionStore;
use mcp_gateway::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    gateway_core::telemetry::init(args.log_json);

    let build = gateway_core::version::BuildInfo::new();
    tracing::info!(version = build.version, "starting mcp-gateway");

    let store: Box<dyn ConfigStore> = Box::new(FileConfigStore::new(args.config_dirs.clone()));
    let reload = Arc::new(ReloadController::bootstrap(store).await?);

    let watcher = FileWatchNotifier::new(&args.config_dirs)?;
    tokio::spawn(reload.clone().watch(Box::new(watcher)));

    let router = Arc::new(Router::new(reload.snapshot()));

    let sessions: Arc<dyn SessionStore> = match &args.session_redis_url {
        Some(url) => Arc::new(SharedSessionStore::connect(url).await?),
        None => Arc::new(LocalSessionStore::new()),
    };

    let env: BTreeMap<String, String> = std::env::vars().collect();

    let state = AppState {
        router,
        sessions,
        reload: reload.clone(),
        env: Arc::new(env),
    };

    let supervisor = Supervisor {
        public_addr: args.addr,
        internal_addr: args.internal_addr,
        reload,
        pid_file: args.pid_file,
    };

    supervisor.run(state).await?;
    Ok(())
}
