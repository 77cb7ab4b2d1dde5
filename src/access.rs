//! Paste access decisions.
//!
//! Every request that touches a paste goes through [`AccessResolver`]. The
//! checks always run in the same order: existence, then expiry, then
//! permission. An expired paste therefore reports `Expired` even to its
//! owner, and even for mutations the caller could otherwise perform.
//!
//! Reading is public once the share id is known; permission only decides
//! whether the caller may change or delete the paste.

use crate::db::StoreError;
use crate::models::paste::{Paste, ShareGrant};
use crate::models::user::{Caller, Role};
use chrono::{DateTime, Utc};

/// Where the resolver looks up share grants.
pub trait GrantSource {
    fn find_grant(&self, paste_id: u64, user_id: u64) -> Result<Option<ShareGrant>, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permission {
    pub is_owner: bool,
    pub can_edit: bool,
}

impl Permission {
    const OWNER: Permission = Permission {
        is_owner: true,
        can_edit: true,
    };
}

/// A mutation attempted on a paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Change content or title. Owner or an edit grant.
    Edit,
    /// Owner only; edit grants do not cover deletion.
    Delete,
    /// List who the paste is shared with. Owner only.
    ViewShares,
}

impl Action {
    fn owner_only(self) -> bool {
        matches!(self, Action::Delete | Action::ViewShares)
    }
}

#[derive(Debug, PartialEq)]
pub enum ReadDecision<'p> {
    NotFound,
    Expired,
    View {
        paste: &'p Paste,
        permission: Permission,
    },
}

#[derive(Debug, PartialEq)]
pub enum MutationDecision<'p> {
    NotFound,
    Expired,
    Denied,
    Allowed {
        paste: &'p Paste,
        permission: Permission,
    },
}

pub struct AccessResolver<'g, G: ?Sized> {
    grants: &'g G,
    now: DateTime<Utc>,
}

impl<'g, G: GrantSource + ?Sized> AccessResolver<'g, G> {
    pub fn new(grants: &'g G, now: DateTime<Utc>) -> Self {
        AccessResolver { grants, now }
    }

    pub fn read<'p>(
        &self,
        paste: Option<&'p Paste>,
        caller: Option<&Caller>,
    ) -> Result<ReadDecision<'p>, StoreError> {
        let Some(paste) = paste else {
            return Ok(ReadDecision::NotFound);
        };
        if paste.is_expired_at(self.now) {
            return Ok(ReadDecision::Expired);
        }

        let permission = self.permission(paste, caller)?;
        Ok(ReadDecision::View { paste, permission })
    }

    pub fn mutate<'p>(
        &self,
        paste: Option<&'p Paste>,
        caller: Option<&Caller>,
        action: Action,
    ) -> Result<MutationDecision<'p>, StoreError> {
        let Some(paste) = paste else {
            return Ok(MutationDecision::NotFound);
        };
        if paste.is_expired_at(self.now) {
            return Ok(MutationDecision::Expired);
        }
        // Knowing the share link never authorizes a change.
        let Some(caller) = caller else {
            return Ok(MutationDecision::Denied);
        };

        let permission = self.permission(paste, Some(caller))?;
        let allowed = if action.owner_only() {
            permission.is_owner
        } else {
            permission.can_edit
        };

        if allowed {
            Ok(MutationDecision::Allowed { paste, permission })
        } else {
            Ok(MutationDecision::Denied)
        }
    }

    fn permission(&self, paste: &Paste, caller: Option<&Caller>) -> Result<Permission, StoreError> {
        match caller {
            Some(caller) if caller.user_id == paste.owner_id => Ok(Permission::OWNER),
            Some(caller) => {
                let grant = self.grants.find_grant(paste.id, caller.user_id)?;
                Ok(Permission {
                    is_owner: false,
                    can_edit: grant.is_some_and(|g| g.can_edit),
                })
            }
            None => Ok(Permission::default()),
        }
    }
}

/// Admins may change anyone's role except their own.
pub fn role_change_permitted(actor: &Caller, target_user_id: u64) -> bool {
    actor.role == Role::Admin && actor.user_id != target_user_id
}
