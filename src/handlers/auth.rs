use crate::access::role_change_permitted;
use crate::error::ApiError;
use crate::middleware::auth::{AdminUser, AuthUser};
use crate::models::user::{Role, User};
use crate::state::AppState;
use crate::utils::auth::{hash_password, verify_password};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 100;

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SigninRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: UserResponse,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user: UserResponse,
}

#[derive(Serialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<UserResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct RoleUpdatedResponse {
    pub message: String,
    pub user: UserResponse,
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ApiError::validation(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::validation(
            "Username may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

fn validate_password(field: &str, password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        return Err(ApiError::validation(format!(
            "{field} must be at least {PASSWORD_MIN} characters"
        )));
    }
    if len > PASSWORD_MAX {
        return Err(ApiError::validation(format!(
            "{field} must be at most {PASSWORD_MAX} characters"
        )));
    }
    Ok(())
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username already exists"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "Authentication"
)]
pub async fn signup(
    state: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    info!(username = %payload.username, "Signup attempt");

    validate_username(&payload.username)?;
    validate_password("Password", &payload.password)?;

    let password_hash = hash_password(&payload.password)?;
    let user = state.users.create(&payload.username, &password_hash).map_err(|e| {
        warn!(username = %payload.username, error = %e, "Signup failed");
        ApiError::from(e)
    })?;

    let token = state.tokens.issue(user.id, user.role)?;

    info!(user_id = user.id, username = %user.username, "User registered successfully");

    Ok(HttpResponse::Created().json(AuthResponse {
        message: "User created successfully".to_string(),
        token,
        user: user.into(),
    }))
}

/// Sign in an existing user
#[utoipa::path(
    post,
    path = "/api/auth/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "Authentication"
)]
pub async fn signin(
    state: web::Data<AppState>,
    payload: web::Json<SigninRequest>,
) -> Result<HttpResponse, ApiError> {
    info!(username = %payload.username, "Signin attempt");

    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Username and password are required"));
    }

    let user = match state.users.get_by_username(&payload.username)? {
        Some(u) => u,
        None => {
            warn!(username = %payload.username, "Signin failed: user not found");
            return Err(ApiError::unauthenticated("Invalid credentials"));
        }
    };

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(username = %payload.username, "Signin failed: invalid credentials");
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }

    let token = state.tokens.issue(user.id, user.role)?;

    info!(user_id = user.id, username = %user.username, "User signed in successfully");

    Ok(HttpResponse::Ok().json(AuthResponse {
        message: "Signed in successfully".to_string(),
        token,
        user: user.into(),
    }))
}

/// Change the caller's password
#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed successfully", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized or incorrect current password"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Authentication"
)]
pub async fn change_password(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_password("New password", &payload.new_password)?;

    let user = state
        .users
        .get_by_id(caller.user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(&payload.current_password, &user.password_hash) {
        warn!(user_id = caller.user_id, "Password change failed: wrong current password");
        return Err(ApiError::unauthenticated("Current password is incorrect"));
    }

    let new_password_hash = hash_password(&payload.new_password)?;
    if !state.users.update_password(caller.user_id, &new_password_hash)? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = caller.user_id, "User changed password");

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Password changed successfully".to_string(),
    }))
}

/// Get the current user
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Authentication"
)]
pub async fn me(
    AuthUser(caller): AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = state
        .users
        .get_by_id(caller.user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(MeResponse { user: user.into() }))
}

/// List all users, newest first (admin only)
#[utoipa::path(
    get,
    path = "/api/auth/users",
    responses(
        (status = 200, description = "All users", body = UsersResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn list_users(
    _admin: AdminUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let users = state.users.list()?;

    Ok(HttpResponse::Ok().json(UsersResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

/// Change a user's role (admin only, never one's own)
#[utoipa::path(
    patch,
    path = "/api/auth/users/{id}/role",
    request_body = UpdateRoleRequest,
    params(
        ("id" = u64, Path, description = "Target user id")
    ),
    responses(
        (status = 200, description = "Role updated", body = RoleUpdatedResponse),
        (status = 400, description = "Invalid role or own account"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn update_role(
    AdminUser(admin): AdminUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<UpdateRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let target_id = path.into_inner();

    if !role_change_permitted(&admin, target_id) {
        warn!(user_id = admin.user_id, "Admin attempted to change own role");
        return Err(ApiError::validation("Cannot change your own role"));
    }

    let user = state
        .users
        .update_role(target_id, payload.role)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(
        admin_id = admin.user_id,
        user_id = user.id,
        role = %user.role,
        "User role changed"
    );

    Ok(HttpResponse::Ok().json(RoleUpdatedResponse {
        message: "Role updated successfully".to_string(),
        user: user.into(),
    }))
}
