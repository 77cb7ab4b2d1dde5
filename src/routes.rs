use crate::config::Config;
use crate::error::ApiError;
use crate::handlers;
use crate::middleware::rate_limit::RateLimitMiddleware;
use actix_web::web;

pub const JSON_LIMIT: usize = 4 * 1024 * 1024;

/// One limiter per route group. Build once and share across workers.
#[derive(Clone)]
pub struct RateLimits {
    pub api: RateLimitMiddleware,
    pub auth: RateLimitMiddleware,
    pub paste: RateLimitMiddleware,
}

impl RateLimits {
    pub fn from_config(config: &Config) -> Self {
        RateLimits {
            api: RateLimitMiddleware::new(
                "api",
                config.api_rate_limit,
                "Too many requests, please try again later",
            ),
            auth: RateLimitMiddleware::new(
                "auth",
                config.auth_rate_limit,
                "Too many authentication attempts, please try again later",
            ),
            paste: RateLimitMiddleware::new(
                "paste",
                config.paste_rate_limit,
                "Too many pastes created, please try again later",
            )
            .authenticated_only(),
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, limits: &RateLimits) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|err, _req| ApiError::validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::validation(err.to_string()).into()),
    )
    .route("/health", web::get().to(handlers::api::health))
    .service(
        web::scope("/api")
            .wrap(limits.api.clone())
            .service(
                web::scope("/auth")
                    .service(
                        web::resource("/signup")
                            .wrap(limits.auth.clone())
                            .route(web::post().to(handlers::auth::signup)),
                    )
                    .service(
                        web::resource("/signin")
                            .wrap(limits.auth.clone())
                            .route(web::post().to(handlers::auth::signin)),
                    )
                    .route("/change-password", web::post().to(handlers::auth::change_password))
                    .route("/me", web::get().to(handlers::auth::me))
                    .route("/users", web::get().to(handlers::auth::list_users))
                    .route("/users/{id}/role", web::patch().to(handlers::auth::update_role)),
            )
            .service(
                web::scope("/pastes")
                    .service(
                        web::resource("")
                            .wrap(limits.paste.clone())
                            .route(web::post().to(handlers::pastes::create_paste)),
                    )
                    // Must precede the share id routes.
                    .route("/my-pastes", web::get().to(handlers::pastes::my_pastes))
                    .service(
                        web::resource("/{share_id}")
                            .route(web::get().to(handlers::pastes::get_paste))
                            .route(web::patch().to(handlers::pastes::update_paste))
                            .route(web::delete().to(handlers::pastes::delete_paste)),
                    )
                    .route(
                        "/{share_id}/shared-users",
                        web::get().to(handlers::pastes::shared_users),
                    ),
            ),
    )
    .default_service(web::to(handlers::api::not_found));
}
