use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use log::info;
use tonedeaf_collab::PrimaryKey;

use crate::{errors::ServerError, ServerContext};

/// The user a gateway handshake was authenticated as.
///
/// Extracting it runs the connection gate, so it must come before the upgrade.
pub struct Session {
    user_id: PrimaryKey,
}

impl Session {
    pub fn user_id(&self) -> PrimaryKey {
        self.user_id
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let cookie = parts
            .headers
            .get(header::COOKIE)
            .and_then(|x| x.to_str().ok());

        let user_id = state.collab.auth.authenticate(cookie).map_err(|err| {
            info!("Refused gateway handshake: {}", err);
            ServerError::from(err)
        })?;

        Ok(Self { user_id })
    }
}
