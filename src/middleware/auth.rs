use crate::error::ApiError;
use crate::models::user::{Caller, Identity};
use crate::utils::auth::TokenService;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderValue, AUTHORIZATION},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use std::future::{ready, Ready};
use std::sync::Arc;
use tracing::debug;

/// Resolves the bearer token of every request into an [`Identity`] and
/// stores it in the request extensions. Never rejects on its own; routes
/// decide through the [`AuthUser`] and [`AdminUser`] extractors.
#[derive(Clone)]
pub struct IdentityMiddleware {
    tokens: Arc<TokenService>,
}

impl IdentityMiddleware {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        IdentityMiddleware { tokens }
    }
}

pub fn resolve_identity(tokens: &TokenService, header: Option<&HeaderValue>) -> Identity {
    let Some(header_value) = header else {
        return Identity::Anonymous;
    };

    let token = header_value
        .to_str()
        .ok()
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty());

    match token.map(|t| tokens.verify(t)) {
        Some(Ok(caller)) => Identity::Authenticated(caller),
        Some(Err(e)) => {
            debug!(error = %e, "Rejected bearer token");
            Identity::Rejected
        }
        None => {
            debug!("Malformed Authorization header");
            Identity::Rejected
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = IdentityMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityMiddlewareService {
            service,
            tokens: self.tokens.clone(),
        }))
    }
}

pub struct IdentityMiddlewareService<S> {
    service: S,
    tokens: Arc<TokenService>,
}

impl<S, B> Service<ServiceRequest> for IdentityMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = S::Future;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let identity = resolve_identity(&self.tokens, req.headers().get(AUTHORIZATION));
        req.extensions_mut().insert(identity);
        self.service.call(req)
    }
}

fn identity_of(req: &HttpRequest) -> Identity {
    req.extensions()
        .get::<Identity>()
        .copied()
        .unwrap_or(Identity::Anonymous)
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(identity_of(req)))
    }
}

/// A caller holding a valid token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Caller);

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticated(req).map(AuthUser))
    }
}

fn authenticated(req: &HttpRequest) -> Result<Caller, ApiError> {
    match identity_of(req) {
        Identity::Authenticated(caller) => Ok(caller),
        Identity::Anonymous => Err(ApiError::unauthenticated("Authorization token required")),
        Identity::Rejected => Err(ApiError::unauthenticated("Invalid or expired token")),
    }
}

/// A caller holding a valid token with the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Caller);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(match authenticated(req) {
            Ok(caller) if caller.is_admin() => Ok(AdminUser(caller)),
            Ok(_) => Err(ApiError::forbidden("Admin access required")),
            Err(e) => Err(e),
        })
    }
}
