use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ordering for the user directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSort {
    Username,
    DateJoined,
}

const SUMMARY_SELECT: &str = r#"SELECT u.id, u.username, u.display_name, p.avatar_url, p.last_seen
    FROM users u JOIN profiles p ON p.user_id = u.id"#;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                display_name TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                avatar_url TEXT DEFAULT '',
                bio TEXT DEFAULT '',
                birth_date TEXT,
                location TEXT DEFAULT '',
                website TEXT DEFAULT '',
                is_private INTEGER DEFAULT 0,
                last_seen TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS friendships (
                user_id TEXT NOT NULL,
                friend_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, friend_id),
                CHECK (user_id <> friend_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (friend_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS friend_requests (
                id TEXT PRIMARY KEY,
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                message TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (from_user_id, to_user_id),
                CHECK (from_user_id <> to_user_id),
                FOREIGN KEY (from_user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (to_user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_friend_requests_to_status ON friend_requests(to_user_id, status);
            CREATE INDEX IF NOT EXISTS idx_friend_requests_from_status ON friend_requests(from_user_id, status);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                related_user_id TEXT,
                message TEXT NOT NULL,
                link TEXT DEFAULT '',
                is_read INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (related_user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, is_read, created_at);

            CREATE TABLE IF NOT EXISTS blocked_users (
                id TEXT PRIMARY KEY,
                blocker_id TEXT NOT NULL,
                blocked_id TEXT NOT NULL,
                reason TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE (blocker_id, blocked_id),
                CHECK (blocker_id <> blocked_id),
                FOREIGN KEY (blocker_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (blocked_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                image_url TEXT DEFAULT '',
                caption TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id, created_at);

            CREATE TABLE IF NOT EXISTS post_likes (
                post_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (post_id, user_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Insert a user together with its empty profile
    pub fn create_user(&self, user: &mut User) -> StoreResult<Profile> {
        let mut conn = self.conn()?;
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;
        let profile = Profile::new(&user.id);

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO users (id, username, email, password_hash, display_name, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.display_name,
                fmt_ts(&user.created_at),
                fmt_ts(&user.updated_at),
            ],
        )
        .map_err(|e| {
            if unique_violation_on(&e, "users.username") {
                StoreError::Conflict("Username already taken".to_string())
            } else if unique_violation_on(&e, "users.email") {
                StoreError::Conflict("Email already registered".to_string())
            } else {
                StoreError::Database(e)
            }
        })?;
        tx.execute(
            r#"INSERT INTO profiles (user_id, last_seen, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                &profile.user_id,
                fmt_ts(&profile.last_seen),
                fmt_ts(&profile.created_at),
                fmt_ts(&profile.updated_at),
            ],
        )?;
        tx.commit()?;
        Ok(profile)
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
            .map_err(|e| not_found_or(e, format!("User {}", id)))
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .map_err(|e| not_found_or(e, format!("User {}", username)))
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM users WHERE email = ?1", params![email], row_to_user)
            .map_err(|e| not_found_or(e, format!("User {}", email)))
    }

    pub fn update_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn()?;
        user.updated_at = Utc::now();
        let rows = conn.execute(
            "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![&user.display_name, fmt_ts(&user.updated_at), &user.id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user.id)));
        }
        Ok(())
    }

    /// Delete a user; every owned row goes with it through ON DELETE CASCADE
    pub fn delete_user(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    pub fn count_users(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Everyone except the viewer and the users the viewer has blocked
    pub fn list_users(&self, viewer_id: &str, sort: UserSort) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let order = match sort {
            UserSort::Username => "u.username ASC",
            UserSort::DateJoined => "u.created_at DESC, u.rowid DESC",
        };
        let sql = format!(
            r#"{} WHERE u.id <> ?1
               AND u.id NOT IN (SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1)
               ORDER BY {}"#,
            SUMMARY_SELECT, order
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![viewer_id], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Case-insensitive substring match on username or display name
    pub fn search_users(&self, viewer_id: &str, query: &str, limit: i64) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"{} WHERE u.id <> ?1
               AND u.id NOT IN (SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1)
               AND (instr(lower(u.username), lower(?2)) > 0 OR instr(lower(u.display_name), lower(?2)) > 0)
               ORDER BY u.username ASC
               LIMIT ?3"#,
            SUMMARY_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![viewer_id, query, limit], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn get_user_summary(&self, id: &str) -> StoreResult<UserSummary> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE u.id = ?1", SUMMARY_SELECT);
        conn.query_row(&sql, params![id], row_to_summary)
            .map_err(|e| not_found_or(e, format!("User {}", id)))
    }

    // ==================== Profile Operations ====================

    pub fn get_profile(&self, user_id: &str) -> StoreResult<Profile> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM profiles WHERE user_id = ?1",
            params![user_id],
            row_to_profile,
        )
        .map_err(|e| not_found_or(e, format!("Profile {}", user_id)))
    }

    pub fn update_profile(&self, profile: &mut Profile) -> StoreResult<()> {
        let conn = self.conn()?;
        profile.updated_at = Utc::now();
        let rows = conn.execute(
            r#"UPDATE profiles SET avatar_url = ?1, bio = ?2, birth_date = ?3, location = ?4,
               website = ?5, is_private = ?6, updated_at = ?7 WHERE user_id = ?8"#,
            params![
                &profile.avatar_url,
                &profile.bio,
                profile.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
                &profile.location,
                &profile.website,
                profile.is_private,
                fmt_ts(&profile.updated_at),
                &profile.user_id,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Profile {}", profile.user_id)));
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, user_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE profiles SET last_seen = ?1 WHERE user_id = ?2",
            params![fmt_ts(&Utc::now()), user_id],
        )?;
        Ok(())
    }

    // ==================== Friendship Operations ====================

    pub fn are_friends(&self, user_id: &str, other_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        Ok(friendship_exists(&conn, user_id, other_id)?)
    }

    pub fn list_friend_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT friend_id FROM friendships WHERE user_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Friends ordered by username, optionally capped
    pub fn list_friends(&self, user_id: &str, limit: Option<i64>) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"{} JOIN friendships f ON f.friend_id = u.id
               WHERE f.user_id = ?1 ORDER BY u.username ASC LIMIT ?2"#,
            SUMMARY_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let friends = stmt
            .query_map(params![user_id, limit.unwrap_or(-1)], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(friends)
    }

    pub fn count_friends(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM friendships WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Friends of friends ranked by how many friends they share with the user.
    /// Existing friends and anyone in a block relationship with the user are skipped.
    pub fn friend_suggestions(&self, user_id: &str, limit: i64) -> StoreResult<Vec<(UserSummary, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.username, u.display_name, p.avatar_url, p.last_seen, COUNT(*) AS mutual_count
               FROM friendships f1
               JOIN friendships f2 ON f2.user_id = f1.friend_id
               JOIN users u ON u.id = f2.friend_id
               JOIN profiles p ON p.user_id = u.id
               WHERE f1.user_id = ?1
                 AND f2.friend_id <> ?1
                 AND f2.friend_id NOT IN (SELECT friend_id FROM friendships WHERE user_id = ?1)
                 AND f2.friend_id NOT IN (SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1)
                 AND f2.friend_id NOT IN (SELECT blocker_id FROM blocked_users WHERE blocked_id = ?1)
               GROUP BY u.id
               ORDER BY mutual_count DESC, u.username ASC
               LIMIT ?2"#,
        )?;
        let suggestions = stmt
            .query_map(params![user_id, limit], |row| {
                Ok((row_to_summary(row)?, row.get::<_, i64>("mutual_count")?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(suggestions)
    }

    /// Drop the friendship in both directions along with every request between the pair
    pub fn remove_friendship(&self, user_id: &str, friend_id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        unlink_friends(&tx, user_id, friend_id)?;
        purge_requests_between(&tx, user_id, friend_id)?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Friend Request Operations ====================

    /// Decide and apply a friend request in one transaction.
    ///
    /// Refuses with `Conflict` when either side has blocked the other, the
    /// pair are already friends, or a (from, to) request exists. A pending
    /// (to, from) request is accepted instead, notifying its sender with
    /// `accept_notification`. Otherwise `request` is inserted pending along
    /// with `request_notification`.
    pub fn send_friend_request(
        &self,
        request: &mut FriendRequest,
        request_notification: Option<&Notification>,
        accept_notification: Option<&Notification>,
    ) -> StoreResult<SendOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let from = request.from_user_id.clone();
        let to = request.to_user_id.clone();

        if block_exists(&tx, &to, &from)? {
            return Err(StoreError::Conflict("This user has blocked you".to_string()));
        }
        if block_exists(&tx, &from, &to)? {
            return Err(StoreError::Conflict("You have blocked this user".to_string()));
        }
        if friendship_exists(&tx, &from, &to)? {
            return Err(StoreError::Conflict("You are already friends".to_string()));
        }

        let existing = request_from(&tx, &from, &to)?;
        if matches!(&existing, Some(r) if r.status == FriendRequestStatus::Pending) {
            return Err(StoreError::Conflict("Friend request already sent".to_string()));
        }
        if let Some(reverse) = request_from(&tx, &to, &from)? {
            if reverse.status == FriendRequestStatus::Pending {
                let accepted = accept_pending(&tx, &reverse.id, accept_notification)?;
                tx.commit()?;
                return Ok(SendOutcome::AutoAccepted(accepted));
            }
        }
        if existing.is_some() {
            return Err(StoreError::Conflict("Request already processed".to_string()));
        }

        let now = Utc::now();
        request.id = Uuid::new_v4().to_string();
        request.status = FriendRequestStatus::Pending;
        request.created_at = now;
        request.updated_at = now;
        tx.execute(
            r#"INSERT INTO friend_requests (id, from_user_id, to_user_id, status, message, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &request.id,
                &request.from_user_id,
                &request.to_user_id,
                request.status,
                &request.message,
                fmt_ts(&request.created_at),
                fmt_ts(&request.updated_at),
            ],
        )?;
        if let Some(n) = request_notification {
            insert_notification(&tx, n)?;
        }
        tx.commit()?;
        Ok(SendOutcome::Sent(request.clone()))
    }

    pub fn get_friend_request(&self, id: &str) -> StoreResult<FriendRequest> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM friend_requests WHERE id = ?1",
            params![id],
            row_to_friend_request,
        )
        .map_err(|e| not_found_or(e, format!("Friend request {}", id)))
    }

    /// The (from, to) request, whatever its status
    pub fn find_friend_request(&self, from_user_id: &str, to_user_id: &str) -> StoreResult<Option<FriendRequest>> {
        let conn = self.conn()?;
        Ok(request_from(&conn, from_user_id, to_user_id)?)
    }

    /// Move a pending request to accepted, link both friend sets and notify the
    /// sender, all in one transaction. Non-pending requests yield `Conflict`.
    pub fn accept_friend_request(
        &self,
        id: &str,
        notification: Option<&Notification>,
    ) -> StoreResult<FriendRequest> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let request = accept_pending(&tx, id, notification)?;
        tx.commit()?;
        Ok(request)
    }

    pub fn reject_friend_request(&self, id: &str) -> StoreResult<FriendRequest> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            r#"UPDATE friend_requests SET status = ?1, updated_at = ?2
               WHERE id = ?3 AND status = ?4"#,
            params![
                FriendRequestStatus::Rejected,
                fmt_ts(&Utc::now()),
                id,
                FriendRequestStatus::Pending
            ],
        )?;
        if rows == 0 {
            return Err(processed_or_missing(&tx, id));
        }

        let request = tx.query_row(
            "SELECT * FROM friend_requests WHERE id = ?1",
            params![id],
            row_to_friend_request,
        )?;
        tx.commit()?;
        Ok(request)
    }

    /// Delete a pending request the given user sent
    pub fn delete_pending_friend_request(&self, id: &str, from_user_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM friend_requests WHERE id = ?1 AND from_user_id = ?2 AND status = ?3",
            params![id, from_user_id, FriendRequestStatus::Pending],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Friend request {}", id)));
        }
        Ok(())
    }

    /// Pending requests addressed to the user, newest first
    pub fn list_incoming_requests(&self, user_id: &str) -> StoreResult<Vec<FriendRequestView>> {
        self.list_request_views(
            r#"SELECT r.*, u.id, u.username, u.display_name, p.avatar_url, p.last_seen
               FROM friend_requests r
               JOIN users u ON u.id = r.from_user_id
               JOIN profiles p ON p.user_id = u.id
               WHERE r.to_user_id = ?1 AND r.status = 'pending'
               ORDER BY r.created_at DESC, r.rowid DESC"#,
            user_id,
        )
    }

    /// Pending requests the user sent, newest first
    pub fn list_outgoing_requests(&self, user_id: &str) -> StoreResult<Vec<FriendRequestView>> {
        self.list_request_views(
            r#"SELECT r.*, u.id, u.username, u.display_name, p.avatar_url, p.last_seen
               FROM friend_requests r
               JOIN users u ON u.id = r.to_user_id
               JOIN profiles p ON p.user_id = u.id
               WHERE r.from_user_id = ?1 AND r.status = 'pending'
               ORDER BY r.created_at DESC, r.rowid DESC"#,
            user_id,
        )
    }

    fn list_request_views(&self, sql: &str, user_id: &str) -> StoreResult<Vec<FriendRequestView>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        // r.* spans the first seven columns; the user card follows
        let views = stmt
            .query_map(params![user_id], |row| {
                let last_seen: String = row.get(11)?;
                Ok(FriendRequestView {
                    request: row_to_friend_request(row)?,
                    user: UserSummary {
                        id: row.get(7)?,
                        username: row.get(8)?,
                        display_name: row.get(9)?,
                        avatar_url: non_empty(row.get(10)?),
                        is_online: seen_recently(parse_datetime(last_seen)),
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    pub fn count_incoming_requests(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM friend_requests WHERE to_user_id = ?1 AND status = 'pending'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Request rows in either direction between two users, any status
    pub fn count_requests_between(&self, a: &str, b: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM friend_requests
               WHERE (from_user_id = ?1 AND to_user_id = ?2) OR (from_user_id = ?2 AND to_user_id = ?1)"#,
            params![a, b],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Block Operations ====================

    pub fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        Ok(block_exists(&conn, blocker_id, blocked_id)?)
    }

    /// Record a block and sever everything between the pair in one transaction
    pub fn create_block(&self, block: &mut BlockedUser) -> StoreResult<()> {
        let mut conn = self.conn()?;
        block.id = Uuid::new_v4().to_string();
        block.created_at = Utc::now();

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO blocked_users (id, blocker_id, blocked_id, reason, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                &block.id,
                &block.blocker_id,
                &block.blocked_id,
                &block.reason,
                fmt_ts(&block.created_at),
            ],
        )
        .map_err(|e| {
            if unique_violation_on(&e, "blocked_users.") {
                StoreError::Conflict("User is already blocked".to_string())
            } else {
                StoreError::Database(e)
            }
        })?;
        unlink_friends(&tx, &block.blocker_id, &block.blocked_id)?;
        purge_requests_between(&tx, &block.blocker_id, &block.blocked_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_block(&self, blocker_id: &str, blocked_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker_id, blocked_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Block {} -> {}", blocker_id, blocked_id)));
        }
        Ok(())
    }

    pub fn list_blocks(&self, blocker_id: &str) -> StoreResult<Vec<BlockedUser>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM blocked_users WHERE blocker_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let blocks = stmt
            .query_map(params![blocker_id], |row| {
                Ok(BlockedUser {
                    id: row.get("id")?,
                    blocker_id: row.get("blocker_id")?,
                    blocked_id: row.get("blocked_id")?,
                    reason: row.get("reason")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    // ==================== Notification Operations ====================

    /// Newest first
    pub fn list_notifications(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Notification>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM notifications WHERE user_id = ?1
               ORDER BY created_at DESC, rowid DESC LIMIT ?2"#,
        )?;
        let notifications = stmt
            .query_map(params![user_id, limit], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn list_unread_notifications(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Notification>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM notifications WHERE user_id = ?1 AND is_read = 0
               ORDER BY created_at DESC, rowid DESC LIMIT ?2"#,
        )?;
        let notifications = stmt
            .query_map(params![user_id, limit], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn count_unread_notifications(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Notification {}", id)));
        }
        Ok(())
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
        )?;
        Ok(rows)
    }

    // ==================== Post Operations ====================

    pub fn create_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn()?;
        post.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        post.created_at = now;
        post.updated_at = now;

        conn.execute(
            r#"INSERT INTO posts (id, author_id, image_url, caption, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &post.id,
                &post.author_id,
                &post.image_url,
                &post.caption,
                fmt_ts(&post.created_at),
                fmt_ts(&post.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM posts WHERE id = ?1", params![id], row_to_post)
            .map_err(|e| not_found_or(e, format!("Post {}", id)))
    }

    pub fn update_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn()?;
        post.updated_at = Utc::now();
        let rows = conn.execute(
            "UPDATE posts SET image_url = ?1, caption = ?2, updated_at = ?3 WHERE id = ?4",
            params![&post.image_url, &post.caption, fmt_ts(&post.updated_at), &post.id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", post.id)));
        }
        Ok(())
    }

    pub fn delete_post(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        Ok(())
    }

    /// All posts, newest first
    pub fn list_posts(&self, limit: i64) -> StoreResult<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM posts ORDER BY created_at DESC, rowid DESC LIMIT ?1")?;
        let posts = stmt
            .query_map(params![limit], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn list_posts_by_author(&self, author_id: &str, limit: i64) -> StoreResult<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM posts WHERE author_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let posts = stmt
            .query_map(params![author_id, limit], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Flip the user's like on a post. Returns whether the post is now liked.
    /// The notification is only written when a like is added.
    pub fn toggle_like(
        &self,
        post_id: &str,
        user_id: &str,
        notification: Option<&Notification>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
        )?;
        if removed > 0 {
            tx.commit()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![post_id, user_id, fmt_ts(&Utc::now())],
        )?;
        if let Some(n) = notification {
            insert_notification(&tx, n)?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn count_likes(&self, post_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn has_liked(&self, post_id: &str, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, user_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ==================== Comment Operations ====================

    /// Insert a comment and its notifications atomically
    pub fn create_comment(&self, comment: &mut Comment, notifications: &[Notification]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        comment.id = Uuid::new_v4().to_string();
        comment.created_at = Utc::now();

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO comments (id, post_id, author_id, text, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                &comment.id,
                &comment.post_id,
                &comment.author_id,
                &comment.text,
                fmt_ts(&comment.created_at),
            ],
        )?;
        for n in notifications {
            insert_notification(&tx, n)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Oldest first
    pub fn list_comments(&self, post_id: &str) -> StoreResult<Vec<Comment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM comments WHERE post_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let comments = stmt
            .query_map(params![post_id], |row| {
                Ok(Comment {
                    id: row.get("id")?,
                    post_id: row.get("post_id")?,
                    author_id: row.get("author_id")?,
                    text: row.get("text")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }
}

// ==================== Transaction Helpers ====================

fn insert_notification(conn: &Connection, n: &Notification) -> rusqlite::Result<()> {
    conn.execute(
        r#"INSERT INTO notifications (id, user_id, notification_type, related_user_id, message, link, is_read, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        params![
            &n.id,
            &n.user_id,
            n.notification_type,
            &n.related_user_id,
            &n.message,
            &n.link,
            n.is_read,
            fmt_ts(&n.created_at),
        ],
    )?;
    Ok(())
}

fn friendship_exists(conn: &Connection, user_id: &str, other_id: &str) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
            params![user_id, other_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn block_exists(conn: &Connection, blocker_id: &str, blocked_id: &str) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker_id, blocked_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn request_from(conn: &Connection, from_user_id: &str, to_user_id: &str) -> rusqlite::Result<Option<FriendRequest>> {
    conn.query_row(
        "SELECT * FROM friend_requests WHERE from_user_id = ?1 AND to_user_id = ?2",
        params![from_user_id, to_user_id],
        row_to_friend_request,
    )
    .optional()
}

/// Pending -> accepted plus the symmetric friendship rows. The caller commits.
fn accept_pending(conn: &Connection, id: &str, notification: Option<&Notification>) -> StoreResult<FriendRequest> {
    let now = fmt_ts(&Utc::now());
    let rows = conn.execute(
        r#"UPDATE friend_requests SET status = ?1, updated_at = ?2
           WHERE id = ?3 AND status = ?4"#,
        params![FriendRequestStatus::Accepted, &now, id, FriendRequestStatus::Pending],
    )?;
    if rows == 0 {
        return Err(processed_or_missing(conn, id));
    }

    let request = conn.query_row(
        "SELECT * FROM friend_requests WHERE id = ?1",
        params![id],
        row_to_friend_request,
    )?;
    conn.execute(
        r#"INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at)
           VALUES (?1, ?2, ?3), (?2, ?1, ?3)"#,
        params![&request.from_user_id, &request.to_user_id, &now],
    )?;
    if let Some(n) = notification {
        insert_notification(conn, n)?;
    }
    Ok(request)
}

fn unlink_friends(conn: &Connection, a: &str, b: &str) -> rusqlite::Result<usize> {
    conn.execute(
        r#"DELETE FROM friendships
           WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)"#,
        params![a, b],
    )
}

fn purge_requests_between(conn: &Connection, a: &str, b: &str) -> rusqlite::Result<usize> {
    conn.execute(
        r#"DELETE FROM friend_requests
           WHERE (from_user_id = ?1 AND to_user_id = ?2) OR (from_user_id = ?2 AND to_user_id = ?1)"#,
        params![a, b],
    )
}

fn processed_or_missing(conn: &Connection, id: &str) -> StoreError {
    let exists = conn
        .query_row("SELECT 1 FROM friend_requests WHERE id = ?1", params![id], |_| Ok(()))
        .optional();
    match exists {
        Ok(Some(())) => StoreError::Conflict("Request already processed".to_string()),
        Ok(None) => StoreError::NotFound(format!("Friend request {}", id)),
        Err(e) => StoreError::Database(e),
    }
}

// ==================== Row Mapping ====================

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        display_name: row.get("display_name")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    let birth_date: Option<String> = row.get("birth_date")?;
    Ok(Profile {
        user_id: row.get("user_id")?,
        avatar_url: row.get("avatar_url")?,
        bio: row.get("bio")?,
        birth_date: birth_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        location: row.get("location")?,
        website: row.get("website")?,
        is_private: row.get("is_private")?,
        last_seen: parse_datetime(row.get::<_, String>("last_seen")?),
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<UserSummary> {
    let last_seen = parse_datetime(row.get::<_, String>("last_seen")?);
    Ok(UserSummary {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        avatar_url: non_empty(row.get("avatar_url")?),
        is_online: seen_recently(last_seen),
    })
}

fn row_to_friend_request(row: &rusqlite::Row) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: row.get(0)?,
        from_user_id: row.get(1)?,
        to_user_id: row.get(2)?,
        status: row.get(3)?,
        message: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        notification_type: row.get("notification_type")?,
        related_user_id: row.get("related_user_id")?,
        message: row.get("message")?,
        link: row.get("link")?,
        is_read: row.get("is_read")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get("id")?,
        author_id: row.get("author_id")?,
        image_url: row.get("image_url")?,
        caption: row.get("caption")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

impl ToSql for FriendRequestStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FriendRequestStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        FriendRequestStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown friend request status: {}", s).into()))
    }
}

impl ToSql for NotificationType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NotificationType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        NotificationType::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown notification type: {}", s).into()))
    }
}

fn not_found_or(e: rusqlite::Error, what: String) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
        _ => StoreError::Database(e),
    }
}

/// True for a UNIQUE/PK violation whose message names the given column prefix
fn unique_violation_on(e: &rusqlite::Error, column: &str) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, Some(msg)) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.starts_with("UNIQUE constraint failed")
                && msg.contains(column)
        }
        _ => false,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Fixed-width RFC 3339 so timestamps sort lexically
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
