use std::env;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub snowflake: SnowflakeConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CORTEX_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CORTEX_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            snowflake: SnowflakeConfig::from_env_profiled(p),
            agent: AgentConfig::from_env_profiled(p),
            tools: ToolsConfig::from_env_profiled(p),
            http: HttpConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  snowflake:  account_url={}, token={}",
            self.snowflake.account_url.as_deref().unwrap_or("(none)"),
            if self.snowflake.auth_token.is_some() { "set" } else { "(none)" }
        );
        tracing::info!("  agent:      endpoint={}", self.agent.endpoint_path());
        tracing::info!(
            "  tools:      semantic_model={}, search_service={}",
            self.tools.semantic_model_path.as_deref().unwrap_or("(none)"),
            self.tools.search_service_path.as_deref().unwrap_or("(none)")
        );
        tracing::info!("  http:       timeout={}s", self.http.request_timeout_secs);
    }
}

// ── Snowflake account / auth ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    pub account_url: Option<String>,
    /// Bearer token sent with every agent request. Never logged.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub token_type: String,
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            account_url: None,
            auth_token: None,
            token_type: "KEYPAIR_JWT".to_string(),
        }
    }
}

impl SnowflakeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            account_url: profiled_env_opt(p, "SNOWFLAKE_ACCOUNT_URL"),
            auth_token: profiled_env_opt(p, "SNOWFLAKE_AUTH_TOKEN"),
            token_type: profiled_env_or(p, "SNOWFLAKE_TOKEN_TYPE", "KEYPAIR_JWT"),
        }
    }

    /// Parse the configured account URL.
    pub fn account_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .account_url
            .as_deref()
            .ok_or(ConfigError::Missing("SNOWFLAKE_ACCOUNT_URL"))?;
        let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
            key: "SNOWFLAKE_ACCOUNT_URL",
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "SNOWFLAKE_ACCOUNT_URL",
                reason: format!("'{}' is not a base URL", raw),
            });
        }
        Ok(url)
    }

    pub fn is_configured(&self) -> bool {
        self.account_url.is_some() && self.auth_token.is_some()
    }
}

// ── Agent endpoint ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: Option<String>,
    /// Model override; the server default is used when unset.
    pub model: Option<String>,
    /// Free-form instruction forwarded as `response_instruction`.
    pub response_instruction: Option<String>,
}

impl AgentConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            database: profiled_env_opt(p, "SNOWFLAKE_AGENT_DATABASE"),
            schema: profiled_env_opt(p, "SNOWFLAKE_AGENT_SCHEMA"),
            name: profiled_env_opt(p, "SNOWFLAKE_AGENT"),
            model: profiled_env_opt(p, "CORTEX_MODEL"),
            response_instruction: profiled_env_opt(p, "CORTEX_RESPONSE_INSTRUCTION"),
        }
    }

    /// Path of the `:run` endpoint relative to the account URL.
    ///
    /// A named agent object is used only when database, schema and name are
    /// all set; otherwise the generic Cortex agent endpoint.
    pub fn endpoint_path(&self) -> String {
        match (&self.database, &self.schema, &self.name) {
            (Some(db), Some(schema), Some(name)) => format!(
                "/api/v2/databases/{}/schemas/{}/agents/{}:run",
                db, schema, name
            ),
            _ => "/api/v2/cortex/agent:run".to_string(),
        }
    }

    /// Parse a `database.schema.name` triple.
    pub fn set_qualified_name(&mut self, qualified: &str) -> Result<(), ConfigError> {
        let parts: Vec<&str> = qualified.split('.').collect();
        match parts.as_slice() {
            [db, schema, name] if !db.is_empty() && !schema.is_empty() && !name.is_empty() => {
                self.database = Some(db.to_string());
                self.schema = Some(schema.to_string());
                self.name = Some(name.to_string());
                Ok(())
            }
            _ => Err(ConfigError::Invalid {
                key: "agent",
                reason: format!("expected database.schema.name, got '{}'", qualified),
            }),
        }
    }
}

// ── Agent tools ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Stage path of the semantic model used by the text-to-SQL tool.
    pub semantic_model_path: Option<String>,
    /// Fully qualified Cortex Search service name.
    pub search_service_path: Option<String>,
    pub search_max_results: u32,
    pub related_queries: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            semantic_model_path: None,
            search_service_path: None,
            search_max_results: 10,
            related_queries: true,
        }
    }
}

impl ToolsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            semantic_model_path: profiled_env_opt(p, "SNOWFLAKE_SEMANTIC_MODEL_PATH"),
            search_service_path: profiled_env_opt(p, "SNOWFLAKE_SEARCH_SERVICE_PATH"),
            search_max_results: profiled_env_u32(p, "CORTEX_SEARCH_MAX_RESULTS", 10),
            related_queries: profiled_env_bool(p, "CORTEX_RELATED_QUERIES", true),
        }
    }
}

// ── HTTP transport ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    /// Upper bound for a single SSE event block.
    pub max_event_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            max_event_bytes: 8 * 1024 * 1024,
        }
    }
}

impl HttpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            request_timeout_secs: profiled_env_u64(p, "CORTEX_REQUEST_TIMEOUT_SECS", 300),
            max_event_bytes: profiled_env_u64(p, "CORTEX_MAX_EVENT_BYTES", 8 * 1024 * 1024)
                as usize,
        }
    }
}
