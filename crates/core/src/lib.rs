pub mod artifacts;
pub mod domain;
pub mod features;
pub mod ingest;
pub mod model;

pub mod config {
    const DEFAULT_MODEL_DIR: &str = "models";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub model_dir: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                model_dir: std::env::var("MODEL_DIR").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        /// Directory trained artifacts are written to and served from.
        pub fn model_dir(&self) -> &str {
            self.model_dir.as_deref().unwrap_or(DEFAULT_MODEL_DIR)
        }
    }
}
