use std::{io, net::SocketAddr};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tonedeaf_collab::AuthError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("{variable} must be a port number, got {value:?}")]
    InvalidPort {
        variable: &'static str,
        value: String,
    },
    #[error("Could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Server stopped unexpectedly: {0}")]
    Serve(#[source] io::Error),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}
