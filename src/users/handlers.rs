use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    state::AppState,
    users::{
        dto::{LoginRequest, NewSearchRequest, RegisterRequest, UpdateUserRequest},
        extractors::AuthUser,
        model::{AuthView, SearchView},
        services,
    },
};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", axum::routing::post(register))
        .route("/auth/login", axum::routing::post(login))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(get_user).put(update_user).delete(delete_user))
        .route("/user/searches", get(list_searches).post(add_search))
        .route("/user/searches/oldest", get(oldest_search))
        .route("/user/searches/:id", delete(remove_search))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<AuthView> {
    let view = services::register(state.store.as_ref(), &state.tokens, payload).await?;
    Ok(Json(view))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<AuthView> {
    let view = services::login(state.store.as_ref(), &state.tokens, payload).await?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn get_user(State(state): State<AppState>, AuthUser(claims): AuthUser) -> ApiResult<AuthView> {
    let view = services::current(state.store.as_ref(), &state.tokens, claims.id).await?;
    Ok(Json(view))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<AuthView> {
    let view = services::update(state.store.as_ref(), &state.tokens, claims.id, payload).await?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<AuthView> {
    let view = services::delete(state.store.as_ref(), &state.tokens, claims.id).await?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn list_searches(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<Vec<SearchView>> {
    let views = services::list_searches(state.store.as_ref(), claims.id).await?;
    Ok(Json(views))
}

#[instrument(skip(state, payload))]
pub async fn add_search(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<NewSearchRequest>,
) -> ApiResult<Vec<SearchView>> {
    let views = services::add_search(state.store.as_ref(), claims.id, payload).await?;
    Ok(Json(views))
}

#[instrument(skip(state))]
pub async fn oldest_search(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<SearchView> {
    let view = services::oldest_search(state.store.as_ref(), claims.id).await?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn remove_search(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<SearchView>> {
    let views = services::remove_search(state.store.as_ref(), claims.id, id).await?;
    Ok(Json(views))
}
