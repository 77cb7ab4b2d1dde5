use crate::config::RateLimit;
use crate::models::user::Identity;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::RETRY_AFTER,
    Error, HttpMessage, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::future::{ready, Ready};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Per-IP request limiter for one route group.
///
/// Build it once, outside the `HttpServer` factory, and clone it into each
/// worker so all workers share the same buckets.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    name: &'static str,
    message: &'static str,
    limiter: Arc<KeyedLimiter>,
    authenticated_only: bool,
}

impl RateLimitMiddleware {
    pub fn new(name: &'static str, limit: RateLimit, message: &'static str) -> Self {
        let burst = NonZeroU32::new(limit.max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(limit.window / burst.get())
            .map(|quota| quota.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_second(burst));
        RateLimitMiddleware {
            name,
            message,
            limiter: Arc::new(RateLimiter::dashmap(quota)),
            authenticated_only: false,
        }
    }

    /// Only requests with a verified token draw from the bucket; the rest
    /// pass through to be turned away by the auth extractors.
    pub fn authenticated_only(mut self) -> Self {
        self.authenticated_only = true;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service,
            name: self.name,
            message: self.message,
            limiter: self.limiter.clone(),
            authenticated_only: self.authenticated_only,
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: S,
    name: &'static str,
    message: &'static str,
    limiter: Arc<KeyedLimiter>,
    authenticated_only: bool,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ip = req
            .peer_addr()
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let counted = !self.authenticated_only
            || matches!(
                req.extensions().get::<Identity>(),
                Some(Identity::Authenticated(_))
            );

        let outcome = if counted {
            self.limiter.check_key(&ip)
        } else {
            Ok(())
        };

        if let Err(not_until) = outcome {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now());
            warn!(ip = %ip, limiter = self.name, "Rate limit exceeded");
            let (req, _pl) = req.into_parts();
            let res = HttpResponse::TooManyRequests()
                .insert_header((RETRY_AFTER, retry_after.as_secs().max(1).to_string()))
                .json(serde_json::json!({ "error": self.message }));
            return Box::pin(
                async move { Ok(ServiceResponse::new(req, res).map_into_boxed_body()) },
            );
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}
