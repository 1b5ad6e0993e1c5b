use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use cortex_core::Config;

use crate::cli::CliArgs;

/// CLI configuration loaded from TOML file.
///
/// Every value is optional; the file fills in what neither the command line
/// nor the environment provides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Snowflake account URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_url: Option<String>,

    /// Auth token (JWT or OAuth token, see `token_type` in the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Named agent object as database.schema.name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Stage path of the semantic model for text-to-SQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_model_path: Option<String>,

    /// Cortex Search service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_service_path: Option<String>,

    /// Instruction forwarded with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_instruction: Option<String>,
}

fn fill(target: &mut Option<String>, fallback: &Option<String>) {
    if target.is_none() {
        *target = fallback.clone();
    }
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/cortex-chat/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("cortex-chat");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Returns default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?;
            Ok(config)
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            let config = Self::default();
            // Create directory and write default config
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let toml_str = toml::to_string_pretty(&config)
                .context("failed to serialize default config")?;
            std::fs::write(&config_path, toml_str).ok();
            Ok(config)
        }
    }

    /// Resolve the effective configuration.
    /// Priority per value: CLI flag > environment > config file.
    pub fn resolve(&self, mut config: Config, args: &CliArgs) -> Result<Config> {
        let snowflake = &mut config.snowflake;
        snowflake.auth_token =
            self.resolve_token(args.token.as_deref(), snowflake.auth_token.as_deref());
        if let Some(url) = &args.account_url {
            snowflake.account_url = Some(url.clone());
        }
        fill(&mut snowflake.account_url, &self.account_url);

        let agent = &mut config.agent;
        if let Some(model) = &args.model {
            agent.model = Some(model.clone());
        }
        fill(&mut agent.model, &self.model);
        fill(&mut agent.response_instruction, &self.response_instruction);

        let qualified = args.agent.as_ref().or(if agent.name.is_none() {
            self.agent.as_ref()
        } else {
            None
        });
        if let Some(qualified) = qualified {
            agent
                .set_qualified_name(qualified)
                .context("invalid --agent / agent setting")?;
        }

        fill(&mut config.tools.semantic_model_path, &self.semantic_model_path);
        fill(&mut config.tools.search_service_path, &self.search_service_path);

        Ok(config)
    }

    /// Resolve the auth token.
    /// Priority: cli_override > env value > config file.
    pub fn resolve_token(&self, cli_override: Option<&str>, env_value: Option<&str>) -> Option<String> {
        // 1. CLI argument
        if let Some(token) = cli_override.filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }

        // 2. Environment variable
        if let Some(token) = env_value.filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }

        // 3. Config file
        self.auth_token.clone().filter(|t| !t.is_empty())
    }
}
