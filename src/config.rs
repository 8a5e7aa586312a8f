use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer token required for mutating routes and isnad analysis.
    /// When unset, the API is open.
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaginationConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> i64 {
    20
}
fn default_max_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_min_score() -> f64 {
    0.82
}
fn default_max_candidates() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the provider's base URL (useful for proxies and tests).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pagination.default_limit < 1 {
            anyhow::bail!("pagination.default_limit must be >= 1");
        }
        if self.pagination.max_limit < self.pagination.default_limit {
            anyhow::bail!("pagination.max_limit must be >= pagination.default_limit");
        }

        if !(0.0..=1.0).contains(&self.matching.min_score) {
            anyhow::bail!("matching.min_score must be in [0.0, 1.0]");
        }
        if self.matching.max_candidates == 0 {
            anyhow::bail!("matching.max_candidates must be > 0");
        }

        if let Some(token) = &self.server.admin_token {
            if token.trim().is_empty() {
                anyhow::bail!("server.admin_token must not be empty when set");
            }
        }

        match self.llm.provider.as_str() {
            "disabled" => {}
            "gemini" | "openai" => {
                if self.llm.model.is_none() {
                    anyhow::bail!(
                        "llm.model must be specified when provider is '{}'",
                        self.llm.provider
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled, gemini, or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/isnad.sqlite"

[server]
bind = "127.0.0.1:7340"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.pagination.default_limit, 20);
        assert_eq!(cfg.pagination.max_limit, 100);
        assert_eq!(cfg.matching.max_candidates, 5);
        assert!(!cfg.llm.is_enabled());
        assert!(cfg.server.admin_token.is_none());
    }

    #[test]
    fn test_llm_provider_requires_model() {
        let text = format!("{}\n[llm]\nprovider = \"gemini\"\n", MINIMAL);
        let err = Config::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("llm.model"));
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let text = format!("{}\n[llm]\nprovider = \"bard\"\nmodel = \"x\"\n", MINIMAL);
        let err = Config::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_min_score_out_of_range() {
        let text = format!("{}\n[matching]\nmin_score = 1.5\n", MINIMAL);
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn test_max_limit_below_default() {
        let text = format!(
            "{}\n[pagination]\ndefault_limit = 50\nmax_limit = 10\n",
            MINIMAL
        );
        assert!(Config::from_toml(&text).is_err());
    }
}
