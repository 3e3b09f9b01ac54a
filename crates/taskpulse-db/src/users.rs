//! User lookup for bearer-token authentication.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use taskpulse_core::{Error, Result, User, UserRepository};

/// Hash a raw bearer token the way it is stored (lowercase hex SHA-256).
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// PostgreSQL implementation of UserRepository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Provision a user with a bearer token. Used by fixtures and seeding.
    pub async fn insert(&self, user: &User, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, email, token_hash) VALUES ($1, $2, $3, $4)")
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(hash_token(token))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    fn parse_user_row(row: &sqlx::postgres::PgRow) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn resolve_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE token_hash = $1")
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_user_row))
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_user_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_token("abc").len(), 64);
    }
}
