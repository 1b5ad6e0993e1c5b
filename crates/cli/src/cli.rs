use clap::Parser;

/// Terminal chat client for Snowflake Cortex agents.
///
/// Streams the agent's answer as it arrives: text, tool calls, SQL result
/// tables, charts and search citations.
#[derive(Parser, Debug)]
#[command(name = "cortex-chat", about = "Terminal chat client for Snowflake Cortex agents")]
pub struct CliArgs {
    /// Snowflake account URL, e.g. https://<account>.snowflakecomputing.com
    #[arg(long)]
    pub account_url: Option<String>,

    /// Auth token (overrides SNOWFLAKE_AUTH_TOKEN and the config file)
    #[arg(long)]
    pub token: Option<String>,

    /// Model override (server default if not set)
    #[arg(long)]
    pub model: Option<String>,

    /// Named agent object as database.schema.name
    #[arg(long)]
    pub agent: Option<String>,

    /// Path to config file (default: ~/.config/cortex-chat/config.toml)
    #[arg(long)]
    pub config: Option<String>,

    /// Environment profile (prefix for profiled env vars, overrides CORTEX_PROFILE)
    #[arg(long)]
    pub profile: Option<String>,
}
