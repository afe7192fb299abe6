use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use archwarden_core::ScannerConfig;

use crate::validation::{ConfigWarnings, validate};

pub const CONFIG_PATH_VAR: &str = "ARCHWARDEN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "ARCHWARDEN_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "archwarden.toml",
    "archwarden.json",
    "config/archwarden.toml",
];

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    /// An explicit path passed to [`ConfigLoader::with_config_path`].
    Explicit(PathBuf),
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: ScannerConfig,
    pub source: ConfigSource,
    pub warnings: ConfigWarnings,
    pub env_file_loaded: bool,
}

/// Resolves a [`ScannerConfig`].
///
/// Evaluation order:
/// 1) an explicit path, if one was given,
/// 2) `$ARCHWARDEN_CONFIG_PATH` (TOML or JSON file),
/// 3) `$ARCHWARDEN_CONFIG_JSON` (inline JSON),
/// 4) the first default file found under the search root,
/// 5) defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    search_root: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Directory the default files are looked up in. Defaults to the
    /// working directory.
    pub fn with_search_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.search_root = Some(root.into());
        self
    }

    pub fn load(&self) -> anyhow::Result<ConfigLoad> {
        let env_file_loaded = load_env_file(self.env_file.as_deref())?;
        let mut load = self.load_with(|key| env::var(key).ok())?;
        load.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`load`](Self::load) with the environment supplied by `lookup`
    /// and no `.env` handling.
    pub fn load_with<F>(&self, lookup: F) -> anyhow::Result<ConfigLoad>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config, source) = self.resolve(lookup)?;
        let warnings = validate(&config).context("configuration rejected")?;
        Ok(ConfigLoad {
            config,
            source,
            warnings,
            env_file_loaded: false,
        })
    }

    fn resolve<F>(&self, lookup: F) -> anyhow::Result<(ScannerConfig, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            let config = load_from_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.clone())));
        }

        if let Some(path_str) = lookup(CONFIG_PATH_VAR)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_VAR)
            && !raw.trim().is_empty()
        {
            let parsed = parse_json(&raw).with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((ScannerConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        let root = self.search_root.as_deref().unwrap_or_else(|| Path::new("."));
        DEFAULT_FILES
            .iter()
            .map(|candidate| root.join(candidate))
            .find(|path| path.exists())
    }
}

/// Loads `.env` (or `path`) into the process environment. A missing file is
/// not an error; a malformed one is.
pub fn load_env_file(path: Option<&Path>) -> anyhow::Result<bool> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|_| true),
        None => dotenvy::dotenv().map(|_| true),
    };
    match result {
        Ok(loaded) => Ok(loaded),
        Err(dotenvy::Error::Io(_)) => Ok(false),
        Err(err) => Err(anyhow!(err).context("failed to read env file")),
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<ScannerConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read scanner config from {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            parse_json(&contents).with_context(|| format!("invalid scanner config {}", path.display()))
        }
        Some("toml") | Some("tml") => toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid scanner config {}: {}", path.display(), err)),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<ScannerConfig> {
    // TOML first, then JSON.
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse scanner config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

pub fn parse_json(raw: &str) -> anyhow::Result<ScannerConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid scanner config json: {err}"))
}
