use crate::access::{AccessResolver, Action, MutationDecision, Permission, ReadDecision};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::models::paste::{NewPaste, Paste, PasteUpdate, DEFAULT_TITLE};
use crate::models::user::{Caller, Identity};
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

pub const TITLE_MAX: usize = 200;
pub const CONTENT_MAX: usize = 500_000;
pub const SHARED_WITH_MAX: usize = 100;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareTarget {
    pub username: String,
    #[serde(default)]
    pub can_edit: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePasteRequest {
    pub title: Option<String>,
    pub content: String,
    /// Hours until the paste expires.
    pub expires_in: Option<f64>,
    #[serde(default)]
    pub shared_with: Vec<ShareTarget>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePasteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPaste {
    pub id: u64,
    pub share_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub share_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreatePasteResponse {
    pub message: String,
    pub paste: CreatedPaste,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasteView {
    pub share_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_owner: bool,
    pub can_edit: bool,
}

impl PasteView {
    fn new(paste: &Paste, permission: Permission) -> Self {
        PasteView {
            share_id: paste.share_id.clone(),
            title: paste.display_title().to_string(),
            content: paste.content.clone(),
            created_at: paste.created_at,
            expires_at: paste.expires_at,
            is_owner: permission.is_owner,
            can_edit: permission.can_edit,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PasteResponse {
    pub paste: PasteView,
}

#[derive(Serialize, ToSchema)]
pub struct UpdatePasteResponse {
    pub message: String,
    pub paste: PasteView,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasteSummary {
    pub id: u64,
    pub share_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SharedPasteSummary {
    pub share_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub owner: Option<String>,
    pub can_edit: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MyPastesResponse {
    pub pastes: Vec<PasteSummary>,
    pub shared_with_me: Vec<SharedPasteSummary>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SharedUser {
    pub user_id: u64,
    pub username: String,
    pub can_edit: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SharedUsersResponse {
    pub shared_users: Vec<SharedUser>,
}

#[derive(Serialize, ToSchema)]
pub struct DeletePasteResponse {
    pub message: String,
}

/// Missing or empty titles become "Untitled".
fn normalize_title(title: Option<&str>) -> Result<String, ApiError> {
    match title {
        Some(t) if t.chars().count() > TITLE_MAX => Err(ApiError::validation(format!(
            "Title must be at most {TITLE_MAX} characters"
        ))),
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Ok(DEFAULT_TITLE.to_string()),
    }
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.is_empty() {
        return Err(ApiError::validation("Content is required"));
    }
    if content.len() > CONTENT_MAX && content.chars().count() > CONTENT_MAX {
        return Err(ApiError::validation(format!(
            "Content must be at most {CONTENT_MAX} characters"
        )));
    }
    Ok(())
}

fn expiry_from_hours(now: DateTime<Utc>, hours: Option<f64>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(hours) = hours else {
        return Ok(None);
    };
    if !hours.is_finite() || hours <= 0.0 {
        return Err(ApiError::validation(
            "expiresIn must be a positive number of hours",
        ));
    }

    Duration::try_milliseconds((hours * 3_600_000.0) as i64)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map(Some)
        .ok_or_else(|| ApiError::validation("expiresIn is too large"))
}

fn share_url(req: &HttpRequest, state: &AppState, share_id: &str) -> String {
    let base = match &state.public_base_url {
        Some(base) => base.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    };
    format!("{base}/share/{share_id}")
}

fn paste_not_found() -> ApiError {
    ApiError::not_found("Paste not found")
}

fn paste_expired() -> ApiError {
    ApiError::Gone("Paste has expired".to_string())
}

/// Runs the resolver for a mutation and turns its decision into an error or
/// the caller's permission.
fn authorize(
    state: &AppState,
    paste: Option<&Paste>,
    caller: &Caller,
    action: Action,
) -> Result<Permission, ApiError> {
    let resolver = AccessResolver::new(&state.pastes, state.clock.now());
    match resolver.mutate(paste, Some(caller), action)? {
        MutationDecision::NotFound => Err(paste_not_found()),
        MutationDecision::Expired => Err(paste_expired()),
        MutationDecision::Denied => {
            warn!(user_id = caller.user_id, ?action, "Paste access denied");
            Err(ApiError::forbidden(match action {
                Action::Edit => "Not authorized to edit this paste",
                Action::Delete => "Not authorized to delete this paste",
                Action::ViewShares => "Not authorized to view who this paste is shared with",
            }))
        }
        MutationDecision::Allowed { permission, .. } => Ok(permission),
    }
}

/// Create a paste, optionally expiring and shared with other users
#[utoipa::path(
    post,
    path = "/api/pastes",
    request_body = CreatePasteRequest,
    responses(
        (status = 201, description = "Paste created", body = CreatePasteResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Too many pastes created")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Pastes"
)]
pub async fn create_paste(
    AuthUser(caller): AuthUser,
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<CreatePasteRequest>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let now = state.clock.now();

    let title = normalize_title(payload.title.as_deref())?;
    validate_content(&payload.content)?;
    let expires_at = expiry_from_hours(now, payload.expires_in)?;
    if payload.shared_with.len() > SHARED_WITH_MAX {
        return Err(ApiError::validation(format!(
            "A paste can be shared with at most {SHARED_WITH_MAX} users"
        )));
    }

    // Unknown usernames and the owner are dropped without complaint.
    let mut shared_with = Vec::with_capacity(payload.shared_with.len());
    for target in &payload.shared_with {
        match state.users.get_by_username(&target.username)? {
            Some(user) if user.id != caller.user_id => shared_with.push((user.id, target.can_edit)),
            Some(_) => {}
            None => debug!(username = %target.username, "Skipping share with unknown user"),
        }
    }

    let paste = state.pastes.create(NewPaste {
        owner_id: caller.user_id,
        title: Some(title),
        content: payload.content,
        created_at: now,
        expires_at,
        shared_with,
    })?;

    info!(
        user_id = caller.user_id,
        share_id = %paste.share_id,
        expires_at = ?paste.expires_at,
        "User created paste"
    );

    Ok(HttpResponse::Created().json(CreatePasteResponse {
        message: "Paste created successfully".to_string(),
        paste: CreatedPaste {
            id: paste.id,
            share_url: share_url(&req, &state, &paste.share_id),
            title: paste.display_title().to_string(),
            share_id: paste.share_id,
            content: paste.content,
            created_at: paste.created_at,
            expires_at: paste.expires_at,
        },
    }))
}

/// List the caller's own pastes and the pastes shared with them
#[utoipa::path(
    get,
    path = "/api/pastes/my-pastes",
    responses(
        (status = 200, description = "Owned and shared pastes", body = MyPastesResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Pastes"
)]
pub async fn my_pastes(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = state.clock.now();
    let owned = state.pastes.find_owned_by(caller.user_id)?;
    let shared = state.pastes.list_granted_to(caller.user_id)?;

    Ok(HttpResponse::Ok().json(MyPastesResponse {
        pastes: owned
            .into_iter()
            .map(|paste| PasteSummary {
                id: paste.id,
                title: paste.display_title().to_string(),
                is_expired: paste.is_expired_at(now),
                share_id: paste.share_id,
                created_at: paste.created_at,
                expires_at: paste.expires_at,
            })
            .collect(),
        shared_with_me: shared
            .into_iter()
            .map(|shared| SharedPasteSummary {
                title: shared.paste.display_title().to_string(),
                is_expired: shared.paste.is_expired_at(now),
                share_id: shared.paste.share_id,
                created_at: shared.paste.created_at,
                expires_at: shared.paste.expires_at,
                owner: shared.owner_username,
                can_edit: shared.can_edit,
            })
            .collect(),
    }))
}

/// Read a paste by its share id (public; a token adds ownership info)
#[utoipa::path(
    get,
    path = "/api/pastes/{share_id}",
    params(
        ("share_id" = String, Path, description = "Public share identifier")
    ),
    responses(
        (status = 200, description = "Paste content", body = PasteResponse),
        (status = 404, description = "Paste not found"),
        (status = 410, description = "Paste has expired")
    ),
    tag = "Pastes"
)]
pub async fn get_paste(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let share_id = path.into_inner();
    if identity == Identity::Rejected {
        debug!(share_id = %share_id, "Reading paste anonymously after rejected token");
    }

    let paste = state.pastes.find_by_share_id(&share_id)?;
    let resolver = AccessResolver::new(&state.pastes, state.clock.now());

    match resolver.read(paste.as_ref(), identity.caller())? {
        ReadDecision::NotFound => Err(paste_not_found()),
        ReadDecision::Expired => Err(paste_expired()),
        ReadDecision::View { paste, permission } => Ok(HttpResponse::Ok().json(PasteResponse {
            paste: PasteView::new(paste, permission),
        })),
    }
}

/// Update a paste's content or title (owner or edit grant)
#[utoipa::path(
    patch,
    path = "/api/pastes/{share_id}",
    request_body = UpdatePasteRequest,
    params(
        ("share_id" = String, Path, description = "Public share identifier")
    ),
    responses(
        (status = 200, description = "Paste updated", body = UpdatePasteResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No edit permission"),
        (status = 404, description = "Paste not found"),
        (status = 410, description = "Paste has expired")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Pastes"
)]
pub async fn update_paste(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdatePasteRequest>,
) -> Result<HttpResponse, ApiError> {
    let share_id = path.into_inner();
    let payload = payload.into_inner();

    let update = PasteUpdate {
        title: match payload.title.as_deref() {
            Some(title) => Some(normalize_title(Some(title))?),
            None => None,
        },
        content: payload.content,
    };
    if update.is_empty() {
        return Err(ApiError::validation("Provide content or title to update"));
    }
    if let Some(content) = &update.content {
        validate_content(content)?;
    }

    let paste = state.pastes.find_by_share_id(&share_id)?;
    let permission = authorize(&state, paste.as_ref(), &caller, Action::Edit)?;

    let updated = state
        .pastes
        .update(&share_id, update)?
        .ok_or_else(paste_not_found)?;

    info!(user_id = caller.user_id, share_id = %share_id, "User updated paste");

    Ok(HttpResponse::Ok().json(UpdatePasteResponse {
        message: "Paste updated successfully".to_string(),
        paste: PasteView::new(&updated, permission),
    }))
}

/// List the users a paste is shared with (owner only)
#[utoipa::path(
    get,
    path = "/api/pastes/{share_id}/shared-users",
    params(
        ("share_id" = String, Path, description = "Public share identifier")
    ),
    responses(
        (status = 200, description = "Grantees", body = SharedUsersResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Paste not found"),
        (status = 410, description = "Paste has expired")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Pastes"
)]
pub async fn shared_users(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let share_id = path.into_inner();
    let paste = state.pastes.find_by_share_id(&share_id)?;
    authorize(&state, paste.as_ref(), &caller, Action::ViewShares)?;
    let Some(paste) = paste else {
        return Err(paste_not_found());
    };

    let mut shared_users = Vec::new();
    for grant in state.pastes.list_grants_for_paste(paste.id)? {
        if let Some(user) = state.users.get_by_id(grant.grantee_user_id)? {
            shared_users.push(SharedUser {
                user_id: user.id,
                username: user.username,
                can_edit: grant.can_edit,
            });
        }
    }

    Ok(HttpResponse::Ok().json(SharedUsersResponse { shared_users }))
}

/// Delete a paste (owner only)
#[utoipa::path(
    delete,
    path = "/api/pastes/{share_id}",
    params(
        ("share_id" = String, Path, description = "Public share identifier")
    ),
    responses(
        (status = 200, description = "Paste deleted", body = DeletePasteResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Paste not found"),
        (status = 410, description = "Paste has expired")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Pastes"
)]
pub async fn delete_paste(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let share_id = path.into_inner();
    let paste = state.pastes.find_by_share_id(&share_id)?;
    authorize(&state, paste.as_ref(), &caller, Action::Delete)?;

    if !state.pastes.delete(&share_id)? {
        return Err(paste_not_found());
    }

    info!(user_id = caller.user_id, share_id = %share_id, "User deleted paste");

    Ok(HttpResponse::Ok().json(DeletePasteResponse {
        message: "Paste deleted successfully".to_string(),
    }))
}
