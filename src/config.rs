use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerConfig,
    ollama: OllamaConfig,
    storage: StorageConfig,
    models: ModelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
    host: String,
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaConfig {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageConfig {
    data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelsConfig {
    fallback: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ollama_url: String,
    pub data_dir: PathBuf,
    pub fallback_model: String,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config_file: ConfigFile =
            toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Self {
            host: config_file.server.host,
            port: config_file.server.port,
            ollama_url: config_file.ollama.url,
            data_dir: config_file.storage.data_dir.into(),
            fallback_model: config_file.models.fallback,
        })
    }

    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}
