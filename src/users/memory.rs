use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, ValidationErrors};
use crate::users::{
    model::{ProfileUpdate, RecentSearch, User},
    repo::UserStore,
};

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(users: &HashMap<Uuid, User>, candidate: &User) -> Result<(), AppError> {
    let mut errors = ValidationErrors::new();
    for other in users.values().filter(|u| u.id != candidate.id) {
        if other.username == candidate.username {
            errors.add("username", "is already taken");
        }
        if other.email == candidate.email {
            errors.add("email", "is already taken");
        }
    }
    errors.into_result()
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, mut user: User) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        check_unique(&users, &user)?;
        let now = OffsetDateTime::now_utc();
        user.created_at = now;
        user.updated_at = now;
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileUpdate) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let mut user = users.get(&id).cloned().ok_or(AppError::NotFound("user"))?;
        user.apply(changes);
        check_unique(&users, &user)?;
        user.updated_at = OffsetDateTime::now_utc();
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn push_search(&self, id: Uuid, search: RecentSearch) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound("user"))?;
        user.push_search(search);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn remove_search(&self, id: Uuid, search_id: Uuid) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound("user"))?;
        user.remove_search(search_id).ok_or(AppError::NotFound("search"))?;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.write().await.remove(&id))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }
}
