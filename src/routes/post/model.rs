use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostDetailResponse {
    pub post: Post,
    pub comments: Vec<Comment>,
}

/// 动态流查询参数。原始值不可信，访问器负责收敛到安全范围
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<String>,
    pub tags: Option<String>,
    pub search: Option<String>,
}

impl FeedQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// 只允许 asc/desc，其余一律按 desc 处理
    pub fn sort(&self) -> &'static str {
        match self.sort.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        }
    }

    /// 逗号分隔的标签，最多取5个
    pub fn tags(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .take(5)
            .map(str::to_string)
            .collect()
    }

    pub fn search(&self) -> &str {
        self.search.as_deref().unwrap_or("")
    }
}

impl Post {
    pub async fn create(
        pool: &PgPool,
        user_id: i64,
        req: &CreatePostRequest,
    ) -> Result<Self, StoreError> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (user_id, title, content, tags)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, content, tags, created_at, updated_at, version
            "#,
        )
        .bind(user_id)
        .bind(&req.title)
        .bind(&req.content)
        .bind(&req.tags)
        .fetch_one(pool)
        .await?;

        Ok(post)
    }

    pub async fn get_by_id(pool: &PgPool, post_id: i64) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, user_id, title, content, tags, created_at, updated_at, version
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    /// 条件更新：只有调用方观察到的版本和当前版本一致才会生效，版本号在同一条
    /// 语句里加一。没有命中任何行时无法区分帖子不存在和版本已过期，统一返回
    /// NotFound，由调用方重新拉取后决定如何处理
    pub async fn update(
        pool: &PgPool,
        post_id: i64,
        expected_version: i32,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<i32, StoreError> {
        let new_version: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE posts
            SET title = $1, content = $2, tags = $3, updated_at = now(), version = version + 1
            WHERE id = $4 AND version = $5
            RETURNING version
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(tags)
        .bind(post_id)
        .bind(expected_version)
        .fetch_optional(pool)
        .await?;

        new_version.ok_or(StoreError::NotFound)
    }

    pub async fn delete(pool: &PgPool, post_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// 当前用户的动态流：自己和关注对象的帖子，支持搜索与标签过滤
    pub async fn user_feed(
        pool: &PgPool,
        user_id: i64,
        query: &FeedQuery,
    ) -> Result<Vec<Self>, StoreError> {
        let sql = format!(
            r#"
            SELECT p.id, p.user_id, p.title, p.content, p.tags, p.created_at, p.updated_at, p.version
            FROM posts p
            LEFT JOIN followers f ON f.user_id = p.user_id
            WHERE (f.follower_id = $1 OR p.user_id = $1)
              AND ($4 = '' OR p.title ILIKE '%' || $4 || '%' OR p.content ILIKE '%' || $4 || '%')
              AND (cardinality($5::text[]) = 0 OR p.tags @> $5)
            GROUP BY p.id
            ORDER BY p.created_at {}
            LIMIT $2 OFFSET $3
            "#,
            query.sort()
        );

        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(user_id)
            .bind(query.limit())
            .bind(query.offset())
            .bind(query.search())
            .bind(query.tags())
            .fetch_all(pool)
            .await?;

        Ok(posts)
    }
}

impl Comment {
    pub async fn create(
        pool: &PgPool,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Self, StoreError> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (post_id, user_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, post_id, user_id,
                      (SELECT username FROM users WHERE id = $2) AS username,
                      content, created_at
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db) = e {
                // 外键失败意味着帖子已经不存在
                if db.code().as_deref() == Some("23503") {
                    return StoreError::NotFound;
                }
            }
            StoreError::Database(e)
        })?;

        Ok(comment)
    }

    pub async fn get_by_post_id(pool: &PgPool, post_id: i64) -> Result<Vec<Self>, StoreError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
            FROM comments c
            JOIN users u ON u.id = c.user_id
            WHERE c.post_id = $1
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(pool)
        .await?;

        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_query_defaults() {
        let query = FeedQuery::default();
        assert_eq!(query.limit(), 20);
        assert_eq!(query.offset(), 0);
        assert_eq!(query.sort(), "DESC");
        assert!(query.tags().is_empty());
        assert_eq!(query.search(), "");
    }

    #[test]
    fn feed_query_clamps_limit_and_offset() {
        let query = FeedQuery {
            limit: Some(1000),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(query.limit(), 100);
        assert_eq!(query.offset(), 0);

        let query = FeedQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(query.limit(), 1);
    }

    #[test]
    fn feed_query_sort_whitelist() {
        let asc = FeedQuery {
            sort: Some("asc".into()),
            ..Default::default()
        };
        assert_eq!(asc.sort(), "ASC");

        let junk = FeedQuery {
            sort: Some("; DROP TABLE posts".into()),
            ..Default::default()
        };
        assert_eq!(junk.sort(), "DESC");
    }

    #[test]
    fn feed_query_tags_are_split_and_capped() {
        let query = FeedQuery {
            tags: Some("rust, web,, backend ,db,extra1,extra2".into()),
            ..Default::default()
        };
        assert_eq!(query.tags(), vec!["rust", "web", "backend", "db", "extra1"]);
    }
}
