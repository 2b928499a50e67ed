use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterUserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// 激活令牌只存 sha256 摘要，明文令牌不落库
fn invitation_token_hash(plain_token: &str) -> String {
    let digest = Sha256::digest(plain_token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

impl User {
    /// 同一个事务里创建未激活用户和对应的激活邀请
    pub async fn create_and_invite(
        pool: &PgPool,
        req: &RegisterUserRequest,
        password_hash: &str,
        plain_token: &str,
        invitation_exp: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let token_hash = invitation_token_hash(plain_token);
        let expiry = Utc::now() + Duration::seconds(invitation_exp.as_secs() as i64);

        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, is_active
            "#,
        )
        .bind(&req.username)
        .bind(&req.email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        sqlx::query(
            r#"
            INSERT INTO user_invitations (token_hash, user_id, expiry)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&token_hash)
        .bind(user.id)
        .bind(expiry)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user)
    }

    /// 用明文激活令牌激活账户：查未过期邀请、置激活位、删邀请，单事务完成
    pub async fn activate(pool: &PgPool, plain_token: &str) -> Result<(), StoreError> {
        let token_hash = invitation_token_hash(plain_token);

        let mut tx = pool.begin().await?;

        let user_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM user_invitations
            WHERE token_hash = $1 AND expiry > now()
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Err(StoreError::NotFound);
        };

        sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn get_by_id(pool: &PgPool, user_id: i64) -> Result<Self, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, is_active
            FROM users
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Self, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, is_active
            FROM users
            WHERE email = $1 AND is_active = TRUE
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)
    }
}

pub struct Follower;

impl Follower {
    pub async fn follow(
        pool: &PgPool,
        followed_id: i64,
        follower_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO followers (user_id, follower_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(followed_id)
        .bind(follower_id)
        .execute(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db) = e {
                if db.code().as_deref() == Some("23505") {
                    return StoreError::Conflict;
                }
                if db.code().as_deref() == Some("23503") {
                    return StoreError::NotFound;
                }
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    pub async fn unfollow(
        pool: &PgPool,
        followed_id: i64,
        follower_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM followers
            WHERE user_id = $1 AND follower_id = $2
            "#,
        )
        .bind(followed_id)
        .bind(follower_id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        match db.constraint() {
            Some("users_email_key") => return StoreError::DuplicateEmail,
            Some("users_username_key") => return StoreError::DuplicateUsername,
            _ => {}
        }
    }
    StoreError::Database(e)
}
