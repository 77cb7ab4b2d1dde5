use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use pastebin_server::clock::SystemClock;
use pastebin_server::config::Config;
use pastebin_server::db::Database;
use pastebin_server::handlers;
use pastebin_server::middleware::auth::IdentityMiddleware;
use pastebin_server::routes::{self, RateLimits};
use pastebin_server::state::AppState;
use pastebin_server::utils::auth::{hash_password, TokenService};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::api::health,
        handlers::auth::signup,
        handlers::auth::signin,
        handlers::auth::change_password,
        handlers::auth::me,
        handlers::auth::list_users,
        handlers::auth::update_role,
        handlers::pastes::create_paste,
        handlers::pastes::my_pastes,
        handlers::pastes::get_paste,
        handlers::pastes::update_paste,
        handlers::pastes::shared_users,
        handlers::pastes::delete_paste,
    ),
    components(
        schemas(
            handlers::api::HealthResponse,
            handlers::api::HealthChecks,
            handlers::auth::SignupRequest,
            handlers::auth::SigninRequest,
            handlers::auth::ChangePasswordRequest,
            handlers::auth::UpdateRoleRequest,
            handlers::auth::UserResponse,
            handlers::auth::AuthResponse,
            handlers::auth::MessageResponse,
            handlers::auth::MeResponse,
            handlers::auth::UsersResponse,
            handlers::auth::RoleUpdatedResponse,
            handlers::pastes::ShareTarget,
            handlers::pastes::CreatePasteRequest,
            handlers::pastes::UpdatePasteRequest,
            handlers::pastes::CreatedPaste,
            handlers::pastes::CreatePasteResponse,
            handlers::pastes::PasteView,
            handlers::pastes::PasteResponse,
            handlers::pastes::UpdatePasteResponse,
            handlers::pastes::PasteSummary,
            handlers::pastes::SharedPasteSummary,
            handlers::pastes::MyPastesResponse,
            handlers::pastes::SharedUser,
            handlers::pastes::SharedUsersResponse,
            handlers::pastes::DeletePasteResponse,
            pastebin_server::models::user::Role,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Authentication", description = "Account endpoints"),
        (name = "Admin", description = "User administration, admin role required"),
        (name = "Pastes", description = "Creating, reading, sharing and deleting pastes")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Token from /api/auth/signin or /api/auth/signup"))
                        .build(),
                ),
            );
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .json()
        .init();

    let config = Config::from_env();
    if config.jwt_uses_default() {
        warn!("JWT_SECRET is not set; using the insecure default secret");
    }

    let database = Database::new(&config.db_path).expect("Failed to initialize database");
    info!(db_path = %config.db_path, "Database initialized");

    let state = AppState::new(
        database,
        TokenService::new(config.jwt_secret.as_bytes()),
        Arc::new(SystemClock),
    )
    .with_public_base_url(config.public_base_url.clone())
    .with_default_secret_flag(config.jwt_uses_default());

    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        let password_hash = hash_password(password).expect("Failed to hash admin password");
        let admin = state
            .users
            .ensure_admin(username, &password_hash)
            .expect("Failed to bootstrap admin account");
        info!(user_id = admin.id, username = %admin.username, "Admin account ready");
    }

    // Built once so every worker draws from the same buckets.
    let limits = RateLimits::from_config(&config);
    let bind_address = config.bind_address();

    info!(bind_address = %bind_address, "Starting pastebin server");
    info!(
        swagger_url = format!("http://{}/swagger-ui/", bind_address),
        "Swagger UI available"
    );

    let data = web::Data::new(state);
    let openapi = ApiDoc::openapi();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(IdentityMiddleware::new(data.tokens.clone()))
            .wrap(TracingLogger::default())
            .wrap(cors)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
            .configure(|cfg| routes::configure(cfg, &limits))
    })
    .bind(&bind_address)?
    .run()
    .await
}
