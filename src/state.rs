use crate::clock::Clock;
use crate::db::paste_repository::PasteRepository;
use crate::db::user_repository::UserRepository;
use crate::db::Database;
use crate::utils::auth::TokenService;
use std::sync::Arc;

/// Shared by every worker; nothing in here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub users: UserRepository,
    pub pastes: PasteRepository,
    pub tokens: Arc<TokenService>,
    pub clock: Arc<dyn Clock>,
    pub public_base_url: Option<String>,
    pub jwt_uses_default: bool,
}

impl AppState {
    pub fn new(db: Database, tokens: TokenService, clock: Arc<dyn Clock>) -> Self {
        AppState {
            users: UserRepository::new(db.clone()),
            pastes: PasteRepository::new(db.clone()),
            db,
            tokens: Arc::new(tokens),
            clock,
            public_base_url: None,
            jwt_uses_default: false,
        }
    }

    pub fn with_public_base_url(mut self, url: Option<String>) -> Self {
        self.public_base_url = url;
        self
    }

    pub fn with_default_secret_flag(mut self, uses_default: bool) -> Self {
        self.jwt_uses_default = uses_default;
        self
    }
}
