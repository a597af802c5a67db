use std::net::SocketAddr;

use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Unset means the in-memory store is used.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    /// `APP_HOST:APP_PORT`, default `0.0.0.0:8080`.
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Configuration("SECRET must be set to a non-empty value".into()))?;
        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());

        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = lookup("APP_PORT").unwrap_or_else(|| "8080".into());
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| AppError::Configuration(format!("invalid APP_HOST/APP_PORT: {e}")))?;

        Ok(Self {
            database_url,
            jwt: JwtConfig { secret },
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn reads_secret_and_database_url() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/searchkeep"),
        ]))
        .expect("config should load");
        assert_eq!(cfg.jwt.secret, "s3cret");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/searchkeep"));
    }

    #[test]
    fn database_url_is_optional() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("SECRET", "s3cret")])).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn bind_address_comes_from_host_and_port() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("SECRET", "s3cret"),
            ("APP_HOST", "127.0.0.1"),
            ("APP_PORT", "9000"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9000");

        let err = AppConfig::from_lookup(lookup_from(&[("SECRET", "s3cret"), ("APP_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn blank_secret_is_a_configuration_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("SECRET", "   ")])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
