//! Identity comes from the API gateway, which authenticates the caller and
//! forwards `x-user-id` and `x-user-role`. Each route group is guarded by the
//! roles allowed to use it.

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    models::{ActorRole, Recipient},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Actor {
    pub role: ActorRole,
    pub id: i32,
}

impl Actor {
    pub fn recipient(&self) -> Recipient {
        Recipient {
            role: self.role,
            id: self.id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing `{name}` header")))
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = header(headers, USER_ID_HEADER)?
        .parse()
        .map_err(|_| AppError::Unauthorized(format!("`{USER_ID_HEADER}` is not an id")))?;
    let role = header(headers, USER_ROLE_HEADER)?
        .parse()
        .map_err(|_| AppError::Unauthorized(format!("`{USER_ROLE_HEADER}` is not a role")))?;
    Ok(Actor { role, id })
}

async fn authorize(mut req: Request, next: Next, allowed: &[ActorRole]) -> Result<Response, AppError> {
    let actor = actor_from_headers(req.headers())?;
    if !allowed.contains(&actor.role) {
        tracing::debug!(role = %actor.role, id = actor.id, path = %req.uri().path(), "Role not allowed");
        return Err(AppError::ForbiddenResource(format!(
            "{} accounts cannot use this resource",
            actor.role
        )));
    }
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

pub async fn customers_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(req, next, &[ActorRole::Customer]).await
}

pub async fn owners_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(req, next, &[ActorRole::Owner]).await
}

pub async fn drivers_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(req, next, &[ActorRole::Driver]).await
}

pub async fn admins_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(req, next, &[ActorRole::Admin]).await
}

pub async fn any_actor_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(req, next, ActorRole::ALL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_actor_from_gateway_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("17"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("driver"));

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor, Actor { role: ActorRole::Driver, id: 17 });
        assert_eq!(actor.recipient(), Recipient::driver(17));
    }

    #[test]
    fn rejects_unknown_role() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("17"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("chef"));

        assert!(matches!(
            actor_from_headers(&headers),
            Err(AppError::Unauthorized(_))
        ));
    }
}
