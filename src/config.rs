use std::{env, path::PathBuf};

/// Runtime configuration, loaded once at startup from the environment
/// (`main` loads a `.env` file first when one exists).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: String,
    pub storage_root: PathBuf,
    pub thumb_bound: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "invalid PORT")?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://notekeep.sqlite?mode=rwc".to_string());

        let storage_root = env::var("STORAGE_ROOT")
            .unwrap_or_else(|_| "./blobs".to_string())
            .into();

        let thumb_bound = env::var("THUMB_BOUND")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .map_err(|_| "invalid THUMB_BOUND")?;

        Ok(Config {
            bind_addr,
            port,
            database_url,
            storage_root,
            thumb_bound,
        })
    }
}
