use chrono::{DateTime, Utc};

pub const DEFAULT_TITLE: &str = "Untitled";

#[derive(Debug, Clone, PartialEq)]
pub struct Paste {
    pub id: u64,
    pub share_id: String,
    pub title: Option<String>,
    pub content: String,
    pub owner_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Paste {
    /// Expired strictly after `expires_at`; a paste without expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPaste {
    pub owner_id: u64,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// `(grantee user id, can_edit)` pairs written with the paste.
    pub shared_with: Vec<(u64, bool)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PasteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl PasteUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareGrant {
    pub paste_id: u64,
    pub grantee_user_id: u64,
    pub can_edit: bool,
}

/// A paste seen from the grantee's side.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedPaste {
    pub paste: Paste,
    pub can_edit: bool,
    pub owner_username: Option<String>,
}
