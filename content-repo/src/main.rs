//! Content repository daemon.
//!
//! Runs a repository with in-memory metadata and either in-memory or
//! on-disk content, plus the periodic lock expiry and trash purge.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use content_repo_core::{
    auth::{Acl, JwtTokenManager, Principal, Privilege, Role, SessionTokenManager, StaticPrincipalManager, TokenManager},
    storage::{
        fs::FsContentStore,
        memory::{InMemoryContentStore, InMemoryDataAccessor, InMemoryRevisionStore},
        ContentStore,
    },
    MaintenanceTask, Repository, RepositoryConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const JWT_SECRET_VAR: &str = "CONTENT_REPO_JWT_SECRET";

#[derive(Parser)]
#[command(name = "content-repo")]
#[command(about = "Hierarchical content repository with ACLs, locks, revisions and trash")]
struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the repository and its maintenance task
    Serve {
        /// Store content below this directory instead of in memory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Directory for temporary upload spool files
        #[arg(long)]
        spool_dir: Option<PathBuf>,

        /// User granted the root role and full access on `/`
        #[arg(long, default_value = "root")]
        admin: String,

        /// Start in read-only mode
        #[arg(long)]
        read_only: bool,
    },

    /// Print the effective configuration as JSON
    Config,

    /// Issue a signed bearer token (needs CONTENT_REPO_JWT_SECRET)
    Token {
        #[arg(short, long)]
        user: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RepositoryConfig::load(path)?,
        None => RepositoryConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            data_dir,
            spool_dir,
            admin,
            read_only,
        } => serve(config, data_dir, spool_dir, admin, read_only).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Token { user, ttl } => {
            let secret = std::env::var(JWT_SECRET_VAR)
                .with_context(|| format!("{} must be set to issue tokens", JWT_SECRET_VAR))?;
            let token = JwtTokenManager::new(&secret).issue(&user, Duration::from_secs(ttl))?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(
    mut config: RepositoryConfig,
    data_dir: Option<PathBuf>,
    spool_dir: Option<PathBuf>,
    admin: String,
    read_only: bool,
) -> Result<()> {
    config.read_only |= read_only;

    let principals = Arc::new(StaticPrincipalManager::new());
    let admin = principals.add_user(admin.as_str());
    principals.grant_role(admin.name(), Role::Root);

    let root_acl = Acl::new()
        .with(Privilege::All, admin.clone())
        .with(Privilege::Read, Principal::everyone());
    let dao = Arc::new(InMemoryDataAccessor::new(root_acl, &admin));

    let content: Arc<dyn ContentStore> = match &data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "storing content on disk");
            Arc::new(FsContentStore::open(dir.join("content"), dir.join("trash")).await?)
        }
        None => {
            warn!("no data directory given, content is kept in memory only");
            Arc::new(InMemoryContentStore::new())
        }
    };

    let tokens: Arc<dyn TokenManager> = match std::env::var(JWT_SECRET_VAR) {
        Ok(secret) => {
            info!("accepting signed bearer tokens");
            Arc::new(JwtTokenManager::new(&secret))
        }
        Err(_) => {
            let sessions = SessionTokenManager::new();
            let token = sessions.issue(admin.clone());
            info!(user = %admin, %token, "issued admin session token");
            Arc::new(sessions)
        }
    };

    let interval = Duration::from_secs(config.maintenance_interval_secs);
    let mut repository = Repository::new(
        dao,
        content,
        Arc::new(InMemoryRevisionStore::new()),
        tokens,
        principals,
        config,
    )?;
    if let Some(dir) = spool_dir {
        tokio::fs::create_dir_all(&dir).await?;
        repository = repository.with_spool_dir(dir);
    }
    let repository = Arc::new(repository);

    let mut events = repository.events().subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(uri = %event.uri(), event = ?event, "repository event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let maintenance = MaintenanceTask::spawn(repository.clone(), interval);
    info!(read_only = repository.is_read_only(), "content repository running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    maintenance.stop().await?;
    event_log.abort();
    Ok(())
}
