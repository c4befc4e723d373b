pub mod domain;
pub mod history;
pub mod model;
pub mod predict;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_MODEL_PATH: &str = "modelo_lgbm.txt";
    pub const DEFAULT_SERVICE_NAME: &str = "M5-Forecasting";
    pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173";
    pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub model_path: String,
        pub service_name: String,
        pub cors_allowed_origins: Vec<String>,
        pub db_max_connections: u32,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
            let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

            let db_max_connections = match non_empty("DB_MAX_CONNECTIONS") {
                Some(v) => v
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer (got {v:?})"))?,
                None => DEFAULT_DB_MAX_CONNECTIONS,
            };
            anyhow::ensure!(db_max_connections >= 1, "DB_MAX_CONNECTIONS must be >= 1");

            let cors_allowed_origins = non_empty("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            Ok(Self {
                database_url: non_empty("DATABASE_URL"),
                model_path: non_empty("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                service_name: non_empty("SERVICE_NAME")
                    .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
                cors_allowed_origins,
                db_max_connections,
                sentry_dsn: non_empty("SENTRY_DSN"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::collections::HashMap;

        fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
            let vars: HashMap<String, String> = vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Settings::from_lookup(|k| vars.get(k).cloned())
        }

        #[test]
        fn defaults_when_unset() {
            let s = settings(&[]).unwrap();
            assert_eq!(s.model_path, DEFAULT_MODEL_PATH);
            assert_eq!(s.service_name, DEFAULT_SERVICE_NAME);
            assert_eq!(s.cors_allowed_origins, vec!["http://localhost:5173".to_string()]);
            assert_eq!(s.db_max_connections, 5);
            assert!(s.database_url.is_none());
            assert!(s.require_database_url().is_err());
        }

        #[test]
        fn splits_cors_origins_and_drops_blanks() {
            let s = settings(&[(
                "CORS_ALLOWED_ORIGINS",
                "http://a.test, http://b.test ,,",
            )])
            .unwrap();
            assert_eq!(
                s.cors_allowed_origins,
                vec!["http://a.test".to_string(), "http://b.test".to_string()]
            );
        }

        #[test]
        fn rejects_bad_pool_size() {
            assert!(settings(&[("DB_MAX_CONNECTIONS", "many")]).is_err());
            assert!(settings(&[("DB_MAX_CONNECTIONS", "0")]).is_err());
        }

        #[test]
        fn blank_database_url_is_missing() {
            let s = settings(&[("DATABASE_URL", "  ")]).unwrap();
            assert!(s.database_url.is_none());
        }
    }
}
