use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, ValidationErrors};
use crate::users::{jwt::TokenIssuer, password};

/// Stored credentials. Hash and salt only ever exist together.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub hash: String,
    pub salt: String,
}

impl PasswordDigest {
    /// Fresh salt plus its PBKDF2 digest of `plain`.
    pub fn derive(plain: &str) -> Self {
        let salt = password::generate_salt();
        let hash = password::derive_hash(plain, &salt);
        Self { hash, salt }
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordDigest").finish_non_exhaustive()
    }
}

/// A search remembered for its owning user. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub id: Uuid,
    #[serde(rename = "searchURL")]
    pub search_url: String,
    #[serde(rename = "dateCreated")]
    pub date_created: i64, // unix millis
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(rename = "updatedAt", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password: Option<PasswordDigest>,
    pub recent_searches: Vec<RecentSearch>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Account fields to change; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<PasswordDigest>,
}

/// Response returned after register, login, update or delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthView {
    pub token: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchView {
    #[serde(rename = "searchURL")]
    pub search_url: String,
    #[serde(rename = "dateCreated")]
    pub date_created: i64,
    #[serde(rename = "searchID")]
    pub search_id: Uuid,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"\S+@\S+\.\S+").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_username(username: &str, errors: &mut ValidationErrors) {
    if username.trim().is_empty() {
        errors.add("username", "can't be blank");
    }
}

fn check_email(email: &str, errors: &mut ValidationErrors) {
    if email.trim().is_empty() {
        errors.add("email", "can't be blank");
    } else if !is_valid_email(email) {
        errors.add("email", "is invalid");
    }
}

fn check_search_url(search_url: &str, errors: &mut ValidationErrors) {
    if search_url.trim().is_empty() {
        errors.add("searchURL", "can't be blank");
    }
}

impl RecentSearch {
    pub fn new(search_url: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            search_url: search_url.into(),
            date_created: (now.unix_timestamp_nanos() / 1_000_000) as i64,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrors::new();
        check_search_url(&self.search_url, &mut errors);
        errors.into_result()
    }

    pub fn to_auth_json(&self) -> SearchView {
        SearchView {
            search_url: self.search_url.clone(),
            date_created: self.date_created,
            search_id: self.id,
        }
    }
}

impl ProfileUpdate {
    /// Checks only the fields being changed.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrors::new();
        if let Some(username) = &self.username {
            check_username(username, &mut errors);
        }
        if let Some(email) = &self.email {
            check_email(email, &mut errors);
        }
        errors.into_result()
    }
}

impl User {
    /// Fresh, unsaved user without credentials.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password: None,
            recent_searches: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks required fields and formats. Uniqueness is the store's job.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrors::new();
        check_username(&self.username, &mut errors);
        check_email(&self.email, &mut errors);
        for search in &self.recent_searches {
            check_search_url(&search.search_url, &mut errors);
        }
        errors.into_result()
    }

    /// Replaces salt and hash; persisting is up to the caller.
    pub fn set_password(&mut self, plain: &str) {
        self.password = Some(PasswordDigest::derive(plain));
    }

    pub fn apply(&mut self, changes: ProfileUpdate) {
        if let Some(username) = changes.username {
            self.username = username;
        }
        if let Some(email) = changes.email {
            self.email = email;
        }
        if let Some(digest) = changes.password {
            self.password = Some(digest);
        }
    }

    pub fn valid_password(&self, plain: &str) -> bool {
        match &self.password {
            Some(digest) => password::verify_password(plain, &digest.salt, &digest.hash),
            None => false,
        }
    }

    pub fn generate_jwt(&self, tokens: &TokenIssuer) -> Result<String, AppError> {
        tokens.issue(self)
    }

    pub fn to_auth_json(&self, tokens: &TokenIssuer) -> Result<AuthView, AppError> {
        Ok(AuthView {
            token: self.generate_jwt(tokens)?,
            email: self.email.clone(),
            username: self.username.clone(),
        })
    }

    pub fn to_auth_searches_json(&self) -> Vec<SearchView> {
        self.recent_searches
            .iter()
            .map(RecentSearch::to_auth_json)
            .collect()
    }

    pub fn push_search(&mut self, search: RecentSearch) -> &RecentSearch {
        self.recent_searches.push(search);
        &self.recent_searches[self.recent_searches.len() - 1]
    }

    pub fn remove_search(&mut self, id: Uuid) -> Option<RecentSearch> {
        let pos = self.recent_searches.iter().position(|s| s.id == id)?;
        Some(self.recent_searches.remove(pos))
    }

    /// Earliest `date_created`; ties go to the entry added first.
    pub fn oldest_search(&self) -> Option<&RecentSearch> {
        self.recent_searches
            .iter()
            .enumerate()
            .min_by_key(|(idx, s)| (s.date_created, *idx))
            .map(|(_, s)| s)
    }
}
