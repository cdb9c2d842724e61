use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use config::{Config, ConfigError, Environment, File, FileFormat};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Value};

use crate::model::Transport;

pub const CONFIG_FILE_NAME: &str = "backup.config";

/// Settings found in the destination root and the environment. Command line
/// flags are applied on top by the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub server: Option<String>,
    pub token: Option<String>,
    pub transport: Option<Transport>,
}

impl MirrorConfig {
    pub fn load(destination: &Path) -> anyhow::Result<Self> {
        let file = config_file(destination);
        let raw_config = RawConfig::load(Some(file.as_path()), None)
            .with_context(|| format!("Could not read {}", file.display()))?;

        Ok(Self {
            server: raw_config.server.filter(|server| !server.trim().is_empty()),
            token: raw_config.token.filter(|token| !token.trim().is_empty()),
            transport: raw_config.transport,
        })
    }
}

/// Stores server and token in the destination's config file, keeping any
/// other keys already there.
pub fn save_credentials(destination: &Path, server: &str, token: &str) -> anyhow::Result<()> {
    let file = config_file(destination);
    let mut settings = match std::fs::read_to_string(&file) {
        Ok(content) => serde_json::from_str::<Map<String, Value>>(&content)
            .with_context(|| format!("{} is not a JSON object", file.display()))?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(error) => {
            return Err(error).with_context(|| format!("Could not read {}", file.display()))
        }
    };
    settings.insert("server".to_owned(), Value::from(server));
    settings.insert("token".to_owned(), Value::from(token));

    let mut content = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut content, PrettyFormatter::with_indent(b"    "));
    settings.serialize(&mut serializer)?;
    content.push(b'\n');

    std::fs::write(&file, content).with_context(|| format!("Could not write {}", file.display()))?;
    info!("Saved settings to {}", file.display());
    Ok(())
}

fn config_file(destination: &Path) -> PathBuf {
    destination.join(CONFIG_FILE_NAME)
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    server: Option<String>,
    token: Option<String>,
    transport: Option<Transport>,
}

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            debug!("Loading settings from {}", file.display());
            builder = builder.add_source(File::from(file).format(FileFormat::Json).required(false));
        }
        builder
            .add_source(
                Environment::with_prefix("REPOMIRROR")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
