//! User account operations.

use chrono::Utc;
use ql_core::{Error, Result, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::models::User;

const COLS: &str = "id, username, password_hash, roles, created_at";

/// Create a new user and return it.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    roles: &[String],
) -> Result<User> {
    let id = UserId::new();
    let created_at = Utc::now().to_rfc3339();
    let roles_json = serde_json::to_string(roles).map_err(|e| Error::Internal(e.to_string()))?;

    conn.execute(
        "INSERT INTO users (id, username, password_hash, roles, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id.to_string(), username, password_hash, roles_json, created_at],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::Conflict(format!("username '{username}' already exists"))
        } else {
            Error::persistence(e)
        }
    })?;

    Ok(User {
        id,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        roles: roles.to_vec(),
        created_at,
    })
}

/// Get a user by primary key.
pub fn get_user_by_id(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], User::from_row)
        .optional()
        .map_err(Error::persistence)
}

/// Get a user by username.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE username = ?1");
    conn.query_row(&q, [username], User::from_row)
        .optional()
        .map_err(Error::persistence)
}
