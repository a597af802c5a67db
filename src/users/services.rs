use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, ValidationErrors};
use crate::users::{
    dto::{LoginRequest, NewSearchRequest, RegisterRequest, UpdateUserRequest},
    jwt::TokenIssuer,
    model::{AuthView, PasswordDigest, ProfileUpdate, RecentSearch, SearchView, User},
    repo::UserStore,
};

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// PBKDF2 is CPU-bound; keep it off the async workers.
async fn set_password_blocking(mut user: User, plain: String) -> Result<User, AppError> {
    tokio::task::spawn_blocking(move || {
        user.set_password(&plain);
        user
    })
    .await
    .context("password hashing task")
    .map_err(AppError::from)
}

async fn derive_digest_blocking(plain: String) -> Result<PasswordDigest, AppError> {
    tokio::task::spawn_blocking(move || PasswordDigest::derive(&plain))
        .await
        .context("password hashing task")
        .map_err(AppError::from)
}

async fn valid_password_blocking(user: User, plain: String) -> Result<(User, bool), AppError> {
    tokio::task::spawn_blocking(move || {
        let ok = user.valid_password(&plain);
        (user, ok)
    })
    .await
    .context("password verification task")
    .map_err(AppError::from)
}

async fn load(store: &dyn UserStore, user_id: Uuid) -> Result<User, AppError> {
    store
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))
}

pub async fn register(
    store: &dyn UserStore,
    tokens: &TokenIssuer,
    req: RegisterRequest,
) -> Result<AuthView, AppError> {
    if req.password.is_empty() {
        return Err(AppError::Validation(ValidationErrors::single(
            "password",
            "can't be blank",
        )));
    }
    let user = User::new(req.username.trim(), normalize_email(&req.email));
    user.validate()?;

    let user = set_password_blocking(user, req.password).await?;
    let user = store.insert(user).await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    user.to_auth_json(tokens)
}

pub async fn login(
    store: &dyn UserStore,
    tokens: &TokenIssuer,
    req: LoginRequest,
) -> Result<AuthView, AppError> {
    let email = normalize_email(&req.email);
    let Some(user) = store.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    let (user, ok) = valid_password_blocking(user, req.password).await?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    user.to_auth_json(tokens)
}

pub async fn current(
    store: &dyn UserStore,
    tokens: &TokenIssuer,
    user_id: Uuid,
) -> Result<AuthView, AppError> {
    load(store, user_id).await?.to_auth_json(tokens)
}

pub async fn update(
    store: &dyn UserStore,
    tokens: &TokenIssuer,
    user_id: Uuid,
    req: UpdateUserRequest,
) -> Result<AuthView, AppError> {
    let mut changes = ProfileUpdate {
        username: req.username.map(|u| u.trim().to_string()),
        email: req.email.as_deref().map(normalize_email),
        password: None,
    };
    changes.validate()?;

    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        changes.password = Some(derive_digest_blocking(password).await?);
    }
    let user = store.update_profile(user_id, changes).await?;

    info!(user_id = %user.id, "user updated");
    user.to_auth_json(tokens)
}

pub async fn delete(
    store: &dyn UserStore,
    tokens: &TokenIssuer,
    user_id: Uuid,
) -> Result<AuthView, AppError> {
    let user = store
        .delete(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    info!(user_id = %user.id, searches = user.recent_searches.len(), "user deleted");
    user.to_auth_json(tokens)
}

pub async fn list_searches(
    store: &dyn UserStore,
    user_id: Uuid,
) -> Result<Vec<SearchView>, AppError> {
    Ok(load(store, user_id).await?.to_auth_searches_json())
}

pub async fn add_search(
    store: &dyn UserStore,
    user_id: Uuid,
    req: NewSearchRequest,
) -> Result<Vec<SearchView>, AppError> {
    let search = RecentSearch::new(req.search_url.trim());
    search.validate()?;
    let search_id = search.id;
    let user = store.push_search(user_id, search).await?;
    info!(user_id = %user.id, %search_id, "search recorded");
    Ok(user.to_auth_searches_json())
}

pub async fn remove_search(
    store: &dyn UserStore,
    user_id: Uuid,
    search_id: Uuid,
) -> Result<Vec<SearchView>, AppError> {
    let user = store.remove_search(user_id, search_id).await?;
    info!(user_id = %user.id, %search_id, "search removed");
    Ok(user.to_auth_searches_json())
}

pub async fn oldest_search(store: &dyn UserStore, user_id: Uuid) -> Result<SearchView, AppError> {
    let user = load(store, user_id).await?;
    user.oldest_search()
        .map(|s| s.to_auth_json())
        .ok_or(AppError::NotFound("search"))
}
