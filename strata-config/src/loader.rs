use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};

use crate::models::{ConfigSource, StrataConfig};

pub const CONFIG_PATH_VAR: &str = "STRATA_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "STRATA_CONFIG_JSON";
pub const CACHE_ROOT_VAR: &str = "STRATA_CACHE_ROOT";
pub const MEMORY_CAPACITY_VAR: &str = "STRATA_MEMORY_CAPACITY";

const DEFAULT_FILES: &[&str] = &[
    "strata.toml",
    "strata.json",
    "config/strata.toml",
    "config/strata.json",
];

impl StrataConfig {
    /// Load configuration using the process environment and working
    /// directory. See [`StrataConfig::load_with`].
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        let cwd = env::current_dir()
            .context("failed to read the working directory")?;
        Self::load_with(|name| env::var(name).ok(), &cwd)
    }

    /// Evaluation order:
    /// 1) `$STRATA_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$STRATA_CONFIG_JSON` (inline JSON),
    /// 3) the first of `strata.toml`, `strata.json`, `config/strata.toml`,
    ///    `config/strata.json` found under `base`,
    /// 4) defaults.
    ///
    /// `$STRATA_CACHE_ROOT` and `$STRATA_MEMORY_CAPACITY` then override the
    /// matching keys, and the result is validated.
    pub fn load_with<E>(
        lookup: E,
        base: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)>
    where
        E: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        let (mut config, source) = if let Some(path) = var(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path.trim());
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = var(CONFIG_JSON_VAR) {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        if let Some(root) = var(CACHE_ROOT_VAR) {
            config.root = Some(PathBuf::from(root.trim()));
        }
        if let Some(raw) = var(MEMORY_CAPACITY_VAR) {
            config.memory_capacity = raw.trim().parse().with_context(|| {
                format!("{MEMORY_CAPACITY_VAR} must be an item count, got {raw:?}")
            })?;
        }

        config.validate()?;
        tracing::debug!(
            ?source,
            formats = config.formats.len(),
            "loaded strata config"
        );
        Ok((config, source))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read strata config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                Self::parse_json(&contents).with_context(|| {
                    format!("invalid strata config {}", path.display())
                })
            }
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| {
                    anyhow!("invalid strata config {}: {}", path.display(), err)
                })
            }
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(
        contents: &str,
        origin: &str,
    ) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse strata config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid strata config json: {err}"))
    }

    fn find_default_file(base: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|path| path.is_file())
    }
}
