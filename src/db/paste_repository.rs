use crate::access::GrantSource;
use crate::db::user_repository::decode_user;
use crate::db::{
    next_id, Database, StoreError, GRANTED_TO, GRANTS, OWNED_PASTES, PASTES, SHARE_IDS, USERS,
};
use crate::models::paste::{NewPaste, Paste, PasteUpdate, ShareGrant, SharedPaste};
use crate::utils::share_id::generate_share_id;
use bincode::{Decode, Encode};
use chrono::{DateTime, SubsecRound};
use redb::{ReadableTable, WriteTransaction};
use std::sync::Arc;
use tracing::{info, warn};

const PASTE_SEQUENCE: &str = "pastes";
const SHARE_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Encode, Decode)]
pub struct StoredPaste {
    pub id: u64,
    pub share_id: String,
    pub title: Option<String>,
    pub content: String,
    pub owner_id: u64,
    pub created_at: i64,         // Unix millis
    pub expires_at: Option<i64>, // Unix millis
}

impl From<&Paste> for StoredPaste {
    fn from(paste: &Paste) -> Self {
        StoredPaste {
            id: paste.id,
            share_id: paste.share_id.clone(),
            title: paste.title.clone(),
            content: paste.content.clone(),
            owner_id: paste.owner_id,
            created_at: paste.created_at.timestamp_millis(),
            expires_at: paste.expires_at.map(|at| at.timestamp_millis()),
        }
    }
}

impl From<StoredPaste> for Paste {
    fn from(stored: StoredPaste) -> Self {
        Paste {
            id: stored.id,
            share_id: stored.share_id,
            title: stored.title,
            content: stored.content,
            owner_id: stored.owner_id,
            created_at: DateTime::from_timestamp_millis(stored.created_at)
                .unwrap_or_else(chrono::Utc::now),
            // An unrepresentable expiry is treated as already passed.
            expires_at: stored
                .expires_at
                .map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)),
        }
    }
}

fn decode_paste(bytes: &[u8]) -> Result<Paste, StoreError> {
    let (stored, _): (StoredPaste, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(Paste::from(stored))
}

fn load_paste(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> Result<Option<Paste>, StoreError> {
    match table.get(id)? {
        Some(data) => Ok(Some(decode_paste(data.value())?)),
        None => Ok(None),
    }
}

fn write_paste(txn: &WriteTransaction, paste: &Paste) -> Result<(), StoreError> {
    let encoded = bincode::encode_to_vec(StoredPaste::from(paste), bincode::config::standard())?;
    let mut pastes = txn.open_table(PASTES)?;
    pastes.insert(paste.id, encoded.as_slice())?;
    Ok(())
}

fn newest_first(pastes: &mut [Paste]) {
    pastes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Writes a grant unless it targets the owner or already exists.
fn insert_grant(
    txn: &WriteTransaction,
    paste: &Paste,
    grantee_user_id: u64,
    can_edit: bool,
) -> Result<bool, StoreError> {
    if grantee_user_id == paste.owner_id {
        return Ok(false);
    }

    let mut grants = txn.open_table(GRANTS)?;
    if grants.get((paste.id, grantee_user_id))?.is_some() {
        return Ok(false);
    }
    grants.insert((paste.id, grantee_user_id), can_edit)?;

    let mut granted_to = txn.open_multimap_table(GRANTED_TO)?;
    granted_to.insert(grantee_user_id, paste.id)?;

    Ok(true)
}

type ShareIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct PasteRepository {
    db: Database,
    share_ids: ShareIdGenerator,
}

impl PasteRepository {
    pub fn new(db: Database) -> Self {
        Self::with_share_id_generator(db, Arc::new(generate_share_id))
    }

    pub fn with_share_id_generator(db: Database, share_ids: ShareIdGenerator) -> Self {
        PasteRepository { db, share_ids }
    }

    /// Draws share ids until one is free. Runs inside the creating write
    /// transaction, so the chosen id cannot be taken concurrently.
    fn allocate_share_id(&self, txn: &WriteTransaction) -> Result<String, StoreError> {
        let index = txn.open_table(SHARE_IDS)?;
        for attempt in 1..=SHARE_ID_ATTEMPTS {
            let candidate = (self.share_ids)();
            if index.get(candidate.as_str())?.is_none() {
                return Ok(candidate);
            }
            warn!(attempt, "Share id collision, regenerating");
        }
        Err(StoreError::ShareIdExhausted(SHARE_ID_ATTEMPTS))
    }

    /// Stores the paste together with its initial grants in one transaction.
    /// Grants naming the owner, and repeated grantees, are skipped.
    pub fn create(&self, new: NewPaste) -> Result<Paste, StoreError> {
        let txn = self.db.db.begin_write()?;

        let share_id = self.allocate_share_id(&txn)?;
        let paste = Paste {
            id: next_id(&txn, PASTE_SEQUENCE)?,
            share_id,
            title: new.title,
            content: new.content,
            owner_id: new.owner_id,
            created_at: new.created_at.trunc_subsecs(3),
            expires_at: new.expires_at.map(|at| at.trunc_subsecs(3)),
        };

        write_paste(&txn, &paste)?;
        {
            let mut share_ids = txn.open_table(SHARE_IDS)?;
            share_ids.insert(paste.share_id.as_str(), paste.id)?;
            let mut owned = txn.open_multimap_table(OWNED_PASTES)?;
            owned.insert(paste.owner_id, paste.id)?;
        }

        let mut granted = 0usize;
        for &(grantee, can_edit) in &new.shared_with {
            if insert_grant(&txn, &paste, grantee, can_edit)? {
                granted += 1;
            }
        }
        txn.commit()?;

        info!(
            paste_id = paste.id,
            share_id = %paste.share_id,
            owner_id = paste.owner_id,
            grants = granted,
            "Paste created in database"
        );

        Ok(paste)
    }

    pub fn find_by_share_id(&self, share_id: &str) -> Result<Option<Paste>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let index = txn.open_table(SHARE_IDS)?;
        let id = index.get(share_id)?.map(|v| v.value());

        match id {
            Some(id) => load_paste(&txn.open_table(PASTES)?, id),
            None => Ok(None),
        }
    }

    /// Pastes owned by `user_id`, newest first.
    pub fn find_owned_by(&self, user_id: u64) -> Result<Vec<Paste>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let owned = txn.open_multimap_table(OWNED_PASTES)?;
        let pastes_table = txn.open_table(PASTES)?;

        let mut pastes = Vec::new();
        for id in owned.get(user_id)? {
            if let Some(paste) = load_paste(&pastes_table, id?.value())? {
                pastes.push(paste);
            }
        }
        newest_first(&mut pastes);

        Ok(pastes)
    }

    /// Last write wins; there is no version check.
    pub fn update(&self, share_id: &str, update: PasteUpdate) -> Result<Option<Paste>, StoreError> {
        let txn = self.db.db.begin_write()?;

        let id = {
            let index = txn.open_table(SHARE_IDS)?;
            let id = index.get(share_id)?.map(|v| v.value());
            id
        };
        let Some(id) = id else {
            return Ok(None);
        };
        let Some(mut paste) = load_paste(&txn.open_table(PASTES)?, id)? else {
            return Ok(None);
        };

        if let Some(title) = update.title {
            paste.title = Some(title);
        }
        if let Some(content) = update.content {
            paste.content = content;
        }
        write_paste(&txn, &paste)?;
        txn.commit()?;

        info!(paste_id = paste.id, share_id = %paste.share_id, "Paste updated in database");

        Ok(Some(paste))
    }

    /// Removes the paste, its indexes and every grant on it.
    pub fn delete(&self, share_id: &str) -> Result<bool, StoreError> {
        let txn = self.db.db.begin_write()?;

        let paste = {
            let index = txn.open_table(SHARE_IDS)?;
            let id = index.get(share_id)?.map(|v| v.value());
            match id {
                Some(id) => load_paste(&txn.open_table(PASTES)?, id)?,
                None => None,
            }
        };
        let Some(paste) = paste else {
            return Ok(false);
        };

        {
            let mut pastes = txn.open_table(PASTES)?;
            pastes.remove(paste.id)?;
            let mut index = txn.open_table(SHARE_IDS)?;
            index.remove(paste.share_id.as_str())?;
            let mut owned = txn.open_multimap_table(OWNED_PASTES)?;
            owned.remove(paste.owner_id, paste.id)?;

            let mut grants = txn.open_table(GRANTS)?;
            let grantees = grants
                .range((paste.id, 0u64)..=(paste.id, u64::MAX))?
                .map(|entry| entry.map(|(key, _)| key.value().1))
                .collect::<Result<Vec<u64>, _>>()?;
            let mut granted_to = txn.open_multimap_table(GRANTED_TO)?;
            for grantee in &grantees {
                grants.remove((paste.id, *grantee))?;
                granted_to.remove(*grantee, paste.id)?;
            }
        }
        txn.commit()?;

        info!(paste_id = paste.id, share_id = %paste.share_id, "Paste deleted from database");

        Ok(true)
    }

    /// Returns `false` when nothing was written: the paste is gone, the
    /// grantee owns it, or the pair already has a grant.
    pub fn grant(&self, paste_id: u64, grantee_user_id: u64, can_edit: bool) -> Result<bool, StoreError> {
        let txn = self.db.db.begin_write()?;

        let Some(paste) = load_paste(&txn.open_table(PASTES)?, paste_id)? else {
            return Ok(false);
        };
        let written = insert_grant(&txn, &paste, grantee_user_id, can_edit)?;
        txn.commit()?;

        if written {
            info!(paste_id, grantee_user_id, can_edit, "Share grant created");
        }

        Ok(written)
    }

    pub fn find_grant(&self, paste_id: u64, user_id: u64) -> Result<Option<ShareGrant>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let grants = txn.open_table(GRANTS)?;
        let can_edit = grants.get((paste_id, user_id))?.map(|v| v.value());

        Ok(can_edit.map(|can_edit| ShareGrant {
            paste_id,
            grantee_user_id: user_id,
            can_edit,
        }))
    }

    pub fn list_grants_for_paste(&self, paste_id: u64) -> Result<Vec<ShareGrant>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let grants = txn.open_table(GRANTS)?;

        let mut out = Vec::new();
        for entry in grants.range((paste_id, 0u64)..=(paste_id, u64::MAX))? {
            let (key, can_edit) = entry?;
            out.push(ShareGrant {
                paste_id,
                grantee_user_id: key.value().1,
                can_edit: can_edit.value(),
            });
        }

        Ok(out)
    }

    /// Pastes shared with `user_id`, newest first, with the owner's name.
    pub fn list_granted_to(&self, user_id: u64) -> Result<Vec<SharedPaste>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let granted_to = txn.open_multimap_table(GRANTED_TO)?;
        let grants = txn.open_table(GRANTS)?;
        let pastes_table = txn.open_table(PASTES)?;
        let users = txn.open_table(USERS)?;

        let mut shared = Vec::new();
        for id in granted_to.get(user_id)? {
            let paste_id = id?.value();
            let Some(paste) = load_paste(&pastes_table, paste_id)? else {
                continue;
            };
            let can_edit = grants
                .get((paste_id, user_id))?
                .map(|v| v.value())
                .unwrap_or(false);
            let owner_username = match users.get(paste.owner_id)? {
                Some(data) => Some(decode_user(data.value())?.username),
                None => None,
            };
            shared.push(SharedPaste {
                paste,
                can_edit,
                owner_username,
            });
        }
        shared.sort_by(|a, b| {
            b.paste
                .created_at
                .cmp(&a.paste.created_at)
                .then(b.paste.id.cmp(&a.paste.id))
        });

        Ok(shared)
    }
}

impl GrantSource for PasteRepository {
    fn find_grant(&self, paste_id: u64, user_id: u64) -> Result<Option<ShareGrant>, StoreError> {
        PasteRepository::find_grant(self, paste_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repository::UserRepository;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        users: UserRepository,
        pastes: PasteRepository,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        Fixture {
            users: UserRepository::new(db.clone()),
            pastes: PasteRepository::new(db),
        }
    }

    fn new_paste(owner_id: u64, content: &str) -> NewPaste {
        NewPaste {
            owner_id,
            title: Some("Untitled".to_string()),
            content: content.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            shared_with: Vec::new(),
        }
    }

    #[test]
    fn test_create_and_find_by_share_id() {
        let f = fixture();
        let alice = f.users.create("alice", "h").unwrap();

        let created = f.pastes.create(new_paste(alice.id, "hello")).unwrap();
        assert_eq!(created.share_id.len(), 10);

        let found = f.pastes.find_by_share_id(&created.share_id).unwrap().unwrap();
        assert_eq!(found, created);
        assert!(f.pastes.find_by_share_id("missing000").unwrap().is_none());
    }

    #[test]
    fn test_expiry_survives_storage() {
        let f = fixture();
        let expires_at = Utc::now() + Duration::hours(1);
        let mut new = new_paste(1, "x");
        new.expires_at = Some(expires_at);

        let created = f.pastes.create(new).unwrap();
        let found = f.pastes.find_by_share_id(&created.share_id).unwrap().unwrap();
        assert_eq!(
            found.expires_at.map(|at| at.timestamp_millis()),
            Some(expires_at.timestamp_millis())
        );
    }

    #[test]
    fn test_share_id_collision_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let generator: ShareIdGenerator = Arc::new(move || {
            // First two draws collide on the same id, then a fresh one appears.
            match counter.fetch_add(1, Ordering::SeqCst) {
                0..=1 => "AAAAAAAAAA".to_string(),
                _ => "BBBBBBBBBB".to_string(),
            }
        });
        let pastes = PasteRepository::with_share_id_generator(Database::in_memory().unwrap(), generator);

        let first = pastes.create(new_paste(1, "one")).unwrap();
        let second = pastes.create(new_paste(1, "two")).unwrap();

        assert_eq!(first.share_id, "AAAAAAAAAA");
        assert_eq!(second.share_id, "BBBBBBBBBB");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_share_id_exhaustion_is_an_error() {
        let generator: ShareIdGenerator = Arc::new(|| "AAAAAAAAAA".to_string());
        let pastes = PasteRepository::with_share_id_generator(Database::in_memory().unwrap(), generator);

        pastes.create(new_paste(1, "one")).unwrap();
        let result = pastes.create(new_paste(1, "two"));
        assert!(matches!(result, Err(StoreError::ShareIdExhausted(_))));
    }

    #[test]
    fn test_find_owned_by_newest_first() {
        let f = fixture();
        let now = Utc::now();
        let mut older = new_paste(1, "older");
        older.created_at = now - Duration::minutes(5);
        let older = f.pastes.create(older).unwrap();
        let newer = f.pastes.create(new_paste(1, "newer")).unwrap();
        f.pastes.create(new_paste(2, "someone else")).unwrap();

        let owned = f.pastes.find_owned_by(1).unwrap();
        assert_eq!(
            owned.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
    }

    #[test]
    fn test_update_changes_only_given_fields() {
        let f = fixture();
        let paste = f.pastes.create(new_paste(1, "hello")).unwrap();

        let updated = f
            .pastes
            .update(
                &paste.share_id,
                PasteUpdate {
                    title: None,
                    content: Some("world".to_string()),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "world");
        assert_eq!(updated.title.as_deref(), Some("Untitled"));

        assert!(f
            .pastes
            .update("missing000", PasteUpdate::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_initial_grants_skip_owner_and_duplicates() {
        let f = fixture();
        let mut new = new_paste(1, "hello");
        new.shared_with = vec![(1, true), (2, false), (2, true), (3, true)];

        let paste = f.pastes.create(new).unwrap();
        let grants = f.pastes.list_grants_for_paste(paste.id).unwrap();

        assert_eq!(
            grants,
            vec![
                ShareGrant {
                    paste_id: paste.id,
                    grantee_user_id: 2,
                    can_edit: false
                },
                ShareGrant {
                    paste_id: paste.id,
                    grantee_user_id: 3,
                    can_edit: true
                },
            ]
        );
        assert!(f.pastes.find_grant(paste.id, 1).unwrap().is_none());
    }

    #[test]
    fn test_grant_is_idempotent() {
        let f = fixture();
        let paste = f.pastes.create(new_paste(1, "hello")).unwrap();

        assert!(f.pastes.grant(paste.id, 2, false).unwrap());
        assert!(!f.pastes.grant(paste.id, 2, true).unwrap());
        assert!(!f.pastes.grant(paste.id, 1, true).unwrap());
        assert!(!f.pastes.grant(999, 2, true).unwrap());

        let grant = f.pastes.find_grant(paste.id, 2).unwrap().unwrap();
        assert!(!grant.can_edit);
    }

    #[test]
    fn test_list_granted_to_joins_owner() {
        let f = fixture();
        let alice = f.users.create("alice", "h").unwrap();
        let bob = f.users.create("bob", "h").unwrap();
        let mut new = new_paste(alice.id, "hello");
        new.shared_with = vec![(bob.id, true)];
        let paste = f.pastes.create(new).unwrap();

        let shared = f.pastes.list_granted_to(bob.id).unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].paste.id, paste.id);
        assert!(shared[0].can_edit);
        assert_eq!(shared[0].owner_username.as_deref(), Some("alice"));

        assert!(f.pastes.list_granted_to(alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_grants() {
        let f = fixture();
        let mut new = new_paste(1, "hello");
        new.shared_with = vec![(2, true)];
        let paste = f.pastes.create(new).unwrap();

        assert!(f.pastes.delete(&paste.share_id).unwrap());
        assert!(f.pastes.find_by_share_id(&paste.share_id).unwrap().is_none());
        assert!(f.pastes.find_grant(paste.id, 2).unwrap().is_none());
        assert!(f.pastes.list_granted_to(2).unwrap().is_empty());
        assert!(f.pastes.find_owned_by(1).unwrap().is_empty());

        assert!(!f.pastes.delete(&paste.share_id).unwrap());
    }
}
