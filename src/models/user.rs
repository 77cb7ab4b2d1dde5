use bincode::{Decode, Encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::User => f.write_str("user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub role: Role,
    pub exp: usize, // Expiration time
    pub iat: usize, // Issued at
}

/// A verified caller, as carried by a valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: u64,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Who is making a request.
///
/// A request without a token is `Anonymous`; a request whose token failed
/// verification is `Rejected`. The two are kept apart so routes that allow
/// anonymous access can still tell a bad token from no token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(Caller),
    Rejected,
}

impl Identity {
    pub fn caller(&self) -> Option<&Caller> {
        match self {
            Identity::Authenticated(caller) => Some(caller),
            Identity::Anonymous | Identity::Rejected => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
        assert!(serde_json::from_str::<Role>("\"root\"").is_err());
    }

    #[test]
    fn only_authenticated_identity_has_caller() {
        let caller = Caller {
            user_id: 7,
            role: Role::User,
        };
        assert_eq!(Identity::Authenticated(caller).caller(), Some(&caller));
        assert!(Identity::Anonymous.caller().is_none());
        assert!(Identity::Rejected.caller().is_none());
    }
}
