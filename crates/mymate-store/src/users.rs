use rusqlite::params;

use mymate_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{parse_timestamp, parse_user_id};
use crate::models::UserRecord;

impl Database {
    /// Insert or replace a user profile. The token version never goes
    /// backwards, so replaying an older profile cannot revive revoked tokens.
    pub fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, first_name, last_name, avatar_url, jwt_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                avatar_url = excluded.avatar_url,
                jwt_version = MAX(users.jwt_version, excluded.jwt_version)",
            params![
                user.id.to_string(),
                user.first_name,
                user.last_name,
                user.avatar_url,
                user.jwt_version,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, first_name, last_name, avatar_url, jwt_version, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Bump the token version of a user, revoking all outstanding tokens.
    /// Returns the new version.
    pub fn bump_jwt_version(&self, id: UserId) -> Result<u32> {
        let affected = self.conn().execute(
            "UPDATE users SET jwt_version = jwt_version + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(self.get_user(id)?.jwt_version)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: parse_user_id(row, 0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        avatar_url: row.get(3)?,
        jwt_version: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
    })
}
