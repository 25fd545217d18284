use std::{convert::Infallible, sync::Arc};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tonedeaf_collab::Collab;

#[derive(Clone)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
}

#[async_trait]
impl FromRequestParts<ServerContext> for ServerContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(state.clone())
    }
}
