use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, ValidationErrors};
use crate::users::model::{PasswordDigest, ProfileUpdate, RecentSearch, User};

/// Storage collaborator for users and their embedded searches.
///
/// Implementations enforce unique usernames and emails and stamp
/// `created_at` / `updated_at` on every write. Every write is a single
/// atomic operation on the stored record, so concurrent writers never
/// overwrite each other's changes.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: User) -> Result<User, AppError>;
    /// Fails with `NotFound("user")` for an unknown id.
    async fn update_profile(&self, id: Uuid, changes: ProfileUpdate) -> Result<User, AppError>;
    /// Appends to the end of the user's searches.
    async fn push_search(&self, id: Uuid, search: RecentSearch) -> Result<User, AppError>;
    /// Fails with `NotFound("search")` when the user has no such entry.
    async fn remove_search(&self, id: Uuid, search_id: Uuid) -> Result<User, AppError>;
    async fn delete(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: Option<String>,
    password_salt: Option<String>,
    recent_searches: Json<Vec<RecentSearch>>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        let password = match (r.password_hash, r.password_salt) {
            (Some(hash), Some(salt)) => Some(PasswordDigest { hash, salt }),
            _ => None,
        };
        Self {
            id: r.id,
            username: r.username,
            email: r.email,
            password,
            recent_searches: r.recent_searches.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, password_salt, recent_searches, created_at, updated_at";

/// Field reported for a violated unique constraint.
fn constraint_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_username_key") => "username",
        Some("users_email_key") => "email",
        _ => "user",
    }
}

fn map_write_error(err: sqlx::Error, what: &'static str) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = constraint_field(db.constraint());
            return AppError::Validation(ValidationErrors::single(field, "is already taken"));
        }
    }
    AppError::Store(anyhow::Error::new(err).context(what))
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        info!("database ready");
        Ok(Self { db })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: User) -> Result<User, AppError> {
        let (hash, salt) = split_digest(user.password.as_ref());
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, password_salt, recent_searches)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(hash)
        .bind(salt)
        .bind(Json(&user.recent_searches))
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_write_error(e, "insert user"))?;
        Ok(row.into())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileUpdate) -> Result<User, AppError> {
        let (hash, salt) = split_digest(changes.password.as_ref());
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET username = COALESCE($2, username),
                   email = COALESCE($3, email),
                   password_hash = COALESCE($4, password_hash),
                   password_salt = COALESCE($5, password_salt),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username.as_deref())
        .bind(changes.email.as_deref())
        .bind(hash)
        .bind(salt)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_error(e, "update user"))?;
        row.map(User::from).ok_or(AppError::NotFound("user"))
    }

    async fn push_search(&self, id: Uuid, search: RecentSearch) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET recent_searches = recent_searches || jsonb_build_array($2::jsonb),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(Json(&search))
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_error(e, "append search"))?;
        row.map(User::from).ok_or(AppError::NotFound("user"))
    }

    async fn remove_search(&self, id: Uuid, search_id: Uuid) -> Result<User, AppError> {
        // Order of the remaining entries is kept via WITH ORDINALITY.
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET recent_searches = COALESCE(
                       (SELECT jsonb_agg(e ORDER BY ord)
                          FROM jsonb_array_elements(recent_searches) WITH ORDINALITY AS t(e, ord)
                         WHERE e->>'id' <> $2),
                       '[]'::jsonb),
                   updated_at = now()
             WHERE id = $1
               AND recent_searches @> jsonb_build_array(jsonb_build_object('id', $2::text))
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(search_id.to_string())
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_error(e, "remove search"))?;
        match row {
            Some(row) => Ok(row.into()),
            None if self.find_by_id(id).await?.is_some() => Err(AppError::NotFound("search")),
            None => Err(AppError::NotFound("user")),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("delete user")?;
        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(row.map(User::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(row.map(User::from))
    }
}

fn split_digest(digest: Option<&PasswordDigest>) -> (Option<&str>, Option<&str>) {
    match digest {
        Some(d) => (Some(d.hash.as_str()), Some(d.salt.as_str())),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: Option<&str>, salt: Option<&str>) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: hash.map(Into::into),
            password_salt: salt.map(Into::into),
            recent_searches: Json(vec![RecentSearch::new("https://example.com/?q=a")]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_converts_to_user() {
        let user = User::from(row(Some("abc"), Some("def")));
        let digest = user.password.expect("digest present");
        assert_eq!(digest.hash, "abc");
        assert_eq!(digest.salt, "def");
        assert_eq!(user.recent_searches.len(), 1);
    }

    #[test]
    fn half_credentials_are_dropped() {
        assert!(User::from(row(Some("abc"), None)).password.is_none());
        assert!(User::from(row(None, None)).password.is_none());
    }

    #[test]
    fn embedded_searches_use_client_field_names() {
        let search = RecentSearch::new("https://example.com/?q=b");
        let json = serde_json::to_value(&search).unwrap();
        assert!(json.get("searchURL").is_some());
        assert!(json.get("dateCreated").is_some());
        assert!(json.get("createdAt").is_some());
        let back: RecentSearch = serde_json::from_value(json).unwrap();
        assert_eq!(back, search);
    }

    #[test]
    fn unique_constraints_map_to_fields() {
        assert_eq!(constraint_field(Some("users_username_key")), "username");
        assert_eq!(constraint_field(Some("users_email_key")), "email");
        assert_eq!(constraint_field(Some("users_pkey")), "user");
        assert_eq!(constraint_field(None), "user");
    }

    fn taken_field(err: AppError) -> &'static str {
        match err {
            AppError::Validation(errors) => {
                let field = ["username", "email", "user"]
                    .into_iter()
                    .find(|f| errors.get(f).is_some())
                    .expect("one field reported");
                assert_eq!(errors.get(field), Some("is already taken"));
                field
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // Needs a reachable Postgres: DATABASE_URL=... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn postgres_writes_are_atomic_and_unique() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PgUserStore::connect(&url).await.unwrap();
        let tag = Uuid::new_v4().simple().to_string();
        let name = format!("pg-{tag}");
        let email = format!("pg-{tag}@example.com");

        let user = store.insert(User::new(&name, &email)).await.unwrap();
        let err = store
            .insert(User::new(&name, format!("other-{tag}@example.com")))
            .await
            .unwrap_err();
        assert_eq!(taken_field(err), "username");
        let err = store
            .insert(User::new(format!("other-{tag}"), &email))
            .await
            .unwrap_err();
        assert_eq!(taken_field(err), "email");

        let first = RecentSearch::new("https://example.com/?q=1");
        let second = RecentSearch::new("https://example.com/?q=2");
        store.push_search(user.id, first.clone()).await.unwrap();
        let saved = store.push_search(user.id, second.clone()).await.unwrap();
        assert_eq!(saved.recent_searches, vec![first.clone(), second.clone()]);

        let saved = store.remove_search(user.id, first.id).await.unwrap();
        assert_eq!(saved.recent_searches, vec![second]);
        let err = store.remove_search(user.id, first.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("search")));

        let saved = store
            .update_profile(
                user.id,
                ProfileUpdate {
                    username: Some(format!("renamed-{tag}")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.username, format!("renamed-{tag}"));
        assert_eq!(saved.email, email);

        store.delete(user.id).await.unwrap();
    }
}
