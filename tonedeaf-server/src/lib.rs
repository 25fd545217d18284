mod auth;
mod context;
mod errors;
mod gateway;

use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use log::info;
use tokio::net::TcpListener;
use tonedeaf_collab::Collab;
use tower_http::cors::{Any, CorsLayer};

pub use auth::Session;
pub use context::ServerContext;
pub use errors::*;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;
pub const PORT_VARIABLE: &str = "TONEDEAF_SERVER_PORT";

pub type Router = axum::Router<ServerContext>;

/// Reads the listen port from the environment
pub fn port_from_env() -> ServerResult<u16> {
    match env::var(PORT_VARIABLE) {
        Ok(value) => value.parse::<u16>().map_err(|_| ServerError::InvalidPort {
            variable: PORT_VARIABLE,
            value,
        }),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

/// Builds the routes of the server around a collab system
pub fn app(collab: Arc<Collab>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new().merge(gateway::router());

    Router::new()
        .nest("/v1", version_one_router)
        .layer(cors)
        .with_state(ServerContext { collab })
}

/// Starts the tonedeaf server
pub async fn run_server(collab: Arc<Collab>, port: u16) -> ServerResult<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!("Listening on {}", addr);

    axum::serve(listener, app(collab))
        .await
        .map_err(ServerError::Serve)
}
