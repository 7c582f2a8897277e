// src/auth/username.rs
//! Unique username allocation
//!
//! Derives a URL-safe handle from a display name and probes the users table
//! for collisions. The probe loop is bounded: after 100 failed attempts a
//! random suffix guarantees termination. Check-then-reserve is not atomic,
//! so uniqueness is best-effort under concurrent allocation of the same
//! seed; the UNIQUE index on users.username is the final arbiter.

use sqlx::SqliteConnection;

use crate::common::{generate_raw_id, ApiError};

/// Maximum normalized username length
const MAX_USERNAME_LENGTH: usize = 20;

/// Collision probes before falling back to a random suffix
const MAX_PROBES: u32 = 100;

/// Allocate a unique username derived from `seed`.
///
/// Runs against a connection so callers inside a transaction probe their
/// own transactional view.
pub async fn allocate_username(
    conn: &mut SqliteConnection,
    seed: &str,
) -> Result<String, ApiError> {
    let base = match normalize_seed(seed) {
        normalized if normalized.is_empty() => {
            format!("user{}", generate_raw_id(6).to_lowercase())
        }
        normalized => normalized,
    };

    let mut candidate = base.clone();
    for attempt in 1..=MAX_PROBES {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = ?")
                .bind(&candidate)
                .fetch_optional(&mut *conn)
                .await
                .map_err(ApiError::DatabaseError)?;

        if existing.is_none() {
            return Ok(candidate);
        }

        candidate = format!("{}{}", base, attempt);
    }

    // Every numbered candidate collided; a random suffix ends the search.
    Ok(format!("{}_{}", base, generate_raw_id(6).to_lowercase()))
}

/// Lowercase, whitespace to `_`, strip anything outside `[a-z0-9_-]`,
/// collapse separator runs, trim separators, cap the length.
fn normalize_seed(seed: &str) -> String {
    let mut out = String::with_capacity(seed.len());
    let mut last_was_sep = true; // drops leading separators

    for c in seed.to_lowercase().chars() {
        if c.is_whitespace() || c == '_' {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_was_sep = false;
        }
    }

    out.truncate(MAX_USERNAME_LENGTH);
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    use crate::common::migrations::run_migrations;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    async fn insert_user(pool: &SqlitePool, id: &str, username: &str) {
        sqlx::query(
            "INSERT INTO users (id, email, name, username) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("{}@example.com", id))
        .bind(username)
        .bind(username)
        .execute(pool)
        .await
        .expect("insert user");
    }

    #[test]
    fn test_normalize_seed() {
        assert_eq!(normalize_seed("Jane Doe"), "jane_doe");
        assert_eq!(normalize_seed("  Jane   Doe  "), "jane_doe");
        assert_eq!(normalize_seed("Alice A"), "alice_a");
        assert_eq!(normalize_seed("José!! García"), "jos_garca");
        assert_eq!(normalize_seed("___"), "");
        assert_eq!(normalize_seed("@#$%"), "");
        assert_eq!(normalize_seed("with-dash"), "with-dash");
        // Truncated to 20 characters
        assert_eq!(
            normalize_seed("a very long display name indeed"),
            "a_very_long_display"
        );
    }

    #[tokio::test]
    async fn test_first_choice_is_deterministic() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let username = allocate_username(&mut conn, "Jane Doe").await.unwrap();
        assert_eq!(username, "jane_doe");
    }

    #[tokio::test]
    async fn test_collision_appends_counter() {
        let pool = test_pool().await;
        insert_user(&pool, "U_000001", "jane_doe").await;

        let mut conn = pool.acquire().await.unwrap();
        let username = allocate_username(&mut conn, "Jane Doe").await.unwrap();
        assert_eq!(username, "jane_doe1");

        drop(conn);
        insert_user(&pool, "U_000002", "jane_doe1").await;

        let mut conn = pool.acquire().await.unwrap();
        let username = allocate_username(&mut conn, "Jane Doe").await.unwrap();
        assert_eq!(username, "jane_doe2");
    }

    #[tokio::test]
    async fn test_empty_seed_gets_random_fallback() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let username = allocate_username(&mut conn, "@#$%").await.unwrap();
        assert!(username.starts_with("user"));
        assert_eq!(username.len(), "user".len() + 6);
    }

    #[tokio::test]
    async fn test_exhausted_probes_fall_back_to_random_suffix() {
        let pool = test_pool().await;
        insert_user(&pool, "U_BASE", "bob").await;
        for i in 1..=MAX_PROBES {
            insert_user(&pool, &format!("U_{:06}", i), &format!("bob{}", i)).await;
        }

        let mut conn = pool.acquire().await.unwrap();
        let username = allocate_username(&mut conn, "Bob").await.unwrap();
        assert!(username.starts_with("bob_"), "got {}", username);
    }
}
