use std::{env, sync::Arc};

use colored::Colorize;
use log::{error, info, warn};
use thiserror::Error;
use tokio::runtime::{self, Runtime};
use tonedeaf_collab::{Auth, Collab, DatabaseError, JwtVerifier, PgDatabase, RoomFabric};
use tonedeaf_core::{
    Config, ConfigError, FabricError, LocalRelay, MemoryPresenceStore, Presence, PresenceError,
    PresenceStore, RedisPresenceStore, RedisRelay, Relay,
};
use tonedeaf_server::{port_from_env, run_server, ServerError};

mod logging;

const DATABASE_URL_VARIABLE: &str = "DATABASE_URL";
const REDIS_URL_VARIABLE: &str = "REDIS_URL";
const SESSION_SECRET_VARIABLE: &str = "TONEDEAF_SESSION_SECRET";
const SESSION_COOKIE_VARIABLE: &str = "TONEDEAF_SESSION_COOKIE";

pub struct ToneDeaf {
    collab: Arc<Collab>,
    port: u16,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum ToneDeafError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{0} is not set")]
    MissingVariable(&'static str),
    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),
    #[error("Could not connect to redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Could not set up presence: {0}")]
    Presence(#[from] PresenceError),
    #[error("Could not start the broadcast fabric: {0}")]
    Fabric(#[from] FabricError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ToneDeaf {
    fn new() -> Result<Self, ToneDeafError> {
        let config = Config::from_env()?;
        let port = port_from_env()?;

        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tonedeaf-async")
            .build()
            .map_err(|e| ToneDeafError::Fatal(e.to_string()))?;

        let collab = runtime.block_on(Self::build_collab(config))?;

        Ok(Self {
            collab: Arc::new(collab),
            port,
            runtime,
        })
    }

    async fn build_collab(config: Config) -> Result<Collab, ToneDeafError> {
        let database_url = required(DATABASE_URL_VARIABLE)?;
        let secret = required(SESSION_SECRET_VARIABLE)?;
        let cookie_name = env::var(SESSION_COOKIE_VARIABLE)
            .unwrap_or_else(|_| Auth::DEFAULT_COOKIE_NAME.to_string());

        info!("Connecting to database...");
        let database = PgDatabase::new(&database_url).await?;
        database.migrate().await?;

        let (store, relay) = match env::var(REDIS_URL_VARIABLE) {
            Ok(url) => {
                info!("Connecting to redis...");
                let client = redis::Client::open(url)?;

                let store: Arc<dyn PresenceStore> =
                    Arc::new(RedisPresenceStore::connect(client.clone()).await?);
                let relay: Arc<dyn Relay> = Arc::new(RedisRelay::connect(client).await?);

                (store, relay)
            }
            Err(_) => {
                warn!(
                    "{} is not set, presence and broadcasts stay within this process",
                    REDIS_URL_VARIABLE
                );

                let store: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::default());
                let relay: Arc<dyn Relay> = Arc::new(LocalRelay::new());

                (store, relay)
            }
        };

        let presence = Presence::new(store, &config);
        let fabric = RoomFabric::start(relay).await?;
        let auth = Auth::new(Arc::new(JwtVerifier::new(secret.as_bytes())), cookie_name);

        Ok(Collab::new(
            config,
            Arc::new(database),
            presence,
            fabric,
            auth,
        ))
    }

    fn run(self) -> Result<(), ToneDeafError> {
        self.runtime
            .block_on(run_server(self.collab.clone(), self.port))?;

        Ok(())
    }
}

impl ToneDeafError {
    fn hint(&self) -> String {
        match self {
            Self::Config(_) => format!(
                "Check the {} and {} variables.",
                Config::HEARTBEAT_VARIABLE,
                Config::PRESENCE_TTL_VARIABLE
            ),
            Self::MissingVariable(_) => "Set the variable in the environment, then try again.".to_string(),
            Self::Database(_) => "This is a database error. Make sure the PostgreSQL instance is running and DATABASE_URL points to it, then try again.".to_string(),
            Self::Redis(_) | Self::Presence(_) | Self::Fabric(_) => "Make sure the redis instance in REDIS_URL is running, or unset it to run a single process.".to_string(),
            Self::Server(_) => "Make sure the port is free, or pick another one with TONEDEAF_SERVER_PORT.".to_string(),
            Self::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn required(variable: &'static str) -> Result<String, ToneDeafError> {
    env::var(variable).map_err(|_| ToneDeafError::MissingVariable(variable))
}

fn main() {
    if let Err(error) = logging::init_logger() {
        eprintln!("Could not initialize logging: {}", error);
        return;
    }

    let result = ToneDeaf::new().and_then(|tonedeaf| {
        info!("Initialized successfully.");
        tonedeaf.run()
    });

    if let Err(error) = result {
        error!("{} Read the error below to troubleshoot the issue. If you think this might be a bug, please report it by making a GitHub issue.", "ToneDeaf failed to start!".bold().red());
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
