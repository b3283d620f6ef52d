use crate::configs::server::ServerConfig;
use crate::server_error::ServerError;
use async_trait::async_trait;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;
use tracing::info;

const ENV_PREFIX: &str = "RAFTSTREAM_";

#[async_trait]
pub trait ConfigProvider {
    async fn load_config(&self) -> Result<ServerConfig, ServerError>;
}

/// Loads the configuration from a TOML file, with `RAFTSTREAM_`-prefixed
/// environment variables overriding individual keys. A missing file falls
/// back to the defaults.
#[derive(Debug)]
pub struct FileConfigProvider {
    path: String,
}

impl FileConfigProvider {
    pub fn new(path: String) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<ServerConfig, ServerError> {
        info!("Loading config from path: '{}'...", self.path);
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if Path::new(&self.path).exists() {
            figment = figment.merge(Toml::file(&self.path));
        } else {
            info!(
                "Config file not found at path: '{}', using defaults.",
                self.path
            );
        }

        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
            .extract()
            .map_err(|error| ServerError::CannotLoadConfiguration(error.to_string()))?;
        if config.stream.max_frame_size == 0 {
            return Err(ServerError::InvalidConfiguration(
                "stream.max_frame_size must be greater than zero".to_string(),
            ));
        }

        info!("Config loaded from path: '{}'.", self.path);
        Ok(config)
    }
}
