use crate::db::{next_id, Database, StoreError, USERNAMES, USERS};
use crate::models::user::{Role, User};
use bincode::{Decode, Encode};
use chrono::{SubsecRound, Utc};
use redb::{ReadableTable, WriteTransaction};
use tracing::info;

const USER_SEQUENCE: &str = "users";

#[derive(Debug, Encode, Decode)]
pub struct StoredUser {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: i64, // Unix millis
}

impl From<User> for StoredUser {
    fn from(user: User) -> Self {
        StoredUser {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            created_at: user.created_at.timestamp_millis(),
        }
    }
}

impl From<StoredUser> for User {
    fn from(stored: StoredUser) -> Self {
        User {
            id: stored.id,
            username: stored.username,
            password_hash: stored.password_hash,
            role: stored.role,
            created_at: chrono::DateTime::from_timestamp_millis(stored.created_at)
                .unwrap_or_else(chrono::Utc::now),
        }
    }
}

pub(crate) fn decode_user(bytes: &[u8]) -> Result<User, StoreError> {
    let (stored, _): (StoredUser, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(User::from(stored))
}

fn write_user(txn: &WriteTransaction, user: &User) -> Result<(), StoreError> {
    let encoded = bincode::encode_to_vec(StoredUser::from(user.clone()), bincode::config::standard())?;
    let mut users = txn.open_table(USERS)?;
    users.insert(user.id, encoded.as_slice())?;
    Ok(())
}

/// The username index is checked and written inside the caller's write
/// transaction; redb serializes writers, so two signups cannot both pass.
fn insert_user(
    txn: &WriteTransaction,
    username: &str,
    password_hash: &str,
    role: Role,
) -> Result<User, StoreError> {
    {
        let usernames = txn.open_table(USERNAMES)?;
        if usernames.get(username)?.is_some() {
            return Err(StoreError::DuplicateUsername);
        }
    }

    let user = User {
        id: next_id(txn, USER_SEQUENCE)?,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        role,
        created_at: Utc::now().trunc_subsecs(3),
    };

    write_user(txn, &user)?;
    let mut usernames = txn.open_table(USERNAMES)?;
    usernames.insert(username, user.id)?;
    Ok(user)
}

fn read_user(txn: &WriteTransaction, id: u64) -> Result<Option<User>, StoreError> {
    let users = txn.open_table(USERS)?;
    let user = match users.get(id)? {
        Some(data) => Some(decode_user(data.value())?),
        None => None,
    };
    Ok(user)
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        UserRepository { db }
    }

    pub fn create(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        self.create_with_role(username, password_hash, Role::User)
    }

    pub fn create_with_role(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, StoreError> {
        let txn = self.db.db.begin_write()?;
        let user = insert_user(&txn, username, password_hash, role)?;
        txn.commit()?;

        info!(user_id = user.id, username = %user.username, role = %user.role, "User created in database");

        Ok(user)
    }

    pub fn get_by_id(&self, id: u64) -> Result<Option<User>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let users = txn.open_table(USERS)?;

        match users.get(id)? {
            Some(data) => Ok(Some(decode_user(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user_id = {
            let txn = self.db.db.begin_read()?;
            let usernames = txn.open_table(USERNAMES)?;
            let id = usernames.get(username)?.map(|v| v.value());
            id
        };

        match user_id {
            Some(id) => self.get_by_id(id),
            None => Ok(None),
        }
    }

    /// Returns `false` when no user has this id.
    pub fn update_password(&self, id: u64, new_password_hash: &str) -> Result<bool, StoreError> {
        let txn = self.db.db.begin_write()?;

        let Some(mut user) = read_user(&txn, id)? else {
            return Ok(false);
        };
        user.password_hash = new_password_hash.to_string();
        write_user(&txn, &user)?;
        txn.commit()?;

        info!(user_id = id, "User password updated in database");

        Ok(true)
    }

    pub fn update_role(&self, id: u64, role: Role) -> Result<Option<User>, StoreError> {
        let txn = self.db.db.begin_write()?;

        let Some(mut user) = read_user(&txn, id)? else {
            return Ok(None);
        };
        user.role = role;
        write_user(&txn, &user)?;
        txn.commit()?;

        info!(user_id = id, role = %role, "User role updated in database");

        Ok(Some(user))
    }

    /// All users, newest first.
    pub fn list(&self) -> Result<Vec<User>, StoreError> {
        let txn = self.db.db.begin_read()?;
        let users = txn.open_table(USERS)?;

        let mut all = Vec::new();
        for entry in users.iter()? {
            let (_, data) = entry?;
            all.push(decode_user(data.value())?);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(all)
    }

    /// Creates `username` as an admin, or promotes it if it already exists.
    /// An existing account keeps its password. Lookup and write share one
    /// transaction.
    pub fn ensure_admin(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let txn = self.db.db.begin_write()?;

        let existing = {
            let usernames = txn.open_table(USERNAMES)?;
            let id = usernames.get(username)?.map(|v| v.value());
            id
        };
        let existing = match existing {
            Some(id) => read_user(&txn, id)?,
            None => None,
        };

        let admin = match existing {
            Some(user) if user.role == Role::Admin => {
                txn.abort()?;
                return Ok(user);
            }
            Some(mut user) => {
                user.role = Role::Admin;
                write_user(&txn, &user)?;
                user
            }
            None => insert_user(&txn, username, password_hash, Role::Admin)?,
        };
        txn.commit()?;

        info!(user_id = admin.id, username = %admin.username, "Admin account ensured in database");

        Ok(admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> UserRepository {
        UserRepository::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_create_and_get_user() {
        let repo = repo();

        let created = repo.create("alice", "hashed_password").unwrap();
        assert_eq!(created.role, Role::User);

        let retrieved = repo.get_by_id(created.id).unwrap().unwrap();
        assert_eq!(retrieved.username, "alice");
        assert_eq!(retrieved.password_hash, "hashed_password");
    }

    #[test]
    fn test_ids_are_generated_and_unique() {
        let repo = repo();
        let a = repo.create("alice", "h").unwrap();
        let b = repo.create("bob", "h").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_get_by_username() {
        let repo = repo();
        let user = repo.create("alice", "h").unwrap();

        let retrieved = repo.get_by_username("alice").unwrap().unwrap();
        assert_eq!(retrieved.id, user.id);
        assert!(repo.get_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username() {
        let repo = repo();
        repo.create("alice", "h1").unwrap();

        let result = repo.create("alice", "h2");
        assert!(matches!(result, Err(StoreError::DuplicateUsername)));
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_update_password() {
        let repo = repo();
        let user = repo.create("alice", "old").unwrap();

        assert!(repo.update_password(user.id, "new").unwrap());
        let retrieved = repo.get_by_id(user.id).unwrap().unwrap();
        assert_eq!(retrieved.password_hash, "new");

        assert!(!repo.update_password(999, "new").unwrap());
    }

    #[test]
    fn test_update_role() {
        let repo = repo();
        let user = repo.create("alice", "h").unwrap();

        let updated = repo.update_role(user.id, Role::Admin).unwrap().unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(repo.get_by_id(user.id).unwrap().unwrap().role, Role::Admin);
        assert!(repo.update_role(999, Role::Admin).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let repo = repo();
        let first = repo.create("first", "h").unwrap();
        let second = repo.create("second", "h").unwrap();

        let users = repo.list().unwrap();
        assert_eq!(users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }

    #[test]
    fn test_ensure_admin_creates_then_promotes() {
        let repo = repo();
        let admin = repo.ensure_admin("root", "h").unwrap();
        assert_eq!(admin.role, Role::Admin);

        let again = repo.ensure_admin("root", "other").unwrap();
        assert_eq!(again.id, admin.id);
        assert_eq!(again.password_hash, "h");

        let plain = repo.create("carol", "h").unwrap();
        let promoted = repo.ensure_admin("carol", "ignored").unwrap();
        assert_eq!(promoted.id, plain.id);
        assert_eq!(promoted.role, Role::Admin);
    }

    #[test]
    fn test_ensure_admin_promotion_is_persisted_in_place() {
        let repo = repo();
        let plain = repo.create("dana", "original-hash").unwrap();

        repo.ensure_admin("dana", "ignored").unwrap();

        let stored = repo.get_by_username("dana").unwrap().unwrap();
        assert_eq!(stored.id, plain.id);
        assert_eq!(stored.role, Role::Admin);
        assert_eq!(stored.password_hash, "original-hash");
        assert_eq!(stored.created_at, plain.created_at);
        assert_eq!(repo.list().unwrap().len(), 1);
    }
}
