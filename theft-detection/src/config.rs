use serde::Deserialize;
use std::{fs, path::PathBuf};
use usage_client::{
    analytics::{ScorerConfig, TrendRules},
    domain::RiskTier,
};

const CONFIG_ENV: &str = "THEFT_DETECTION_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "theft-detection.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Lowest tier counted as a positive prediction against `is_anomaly` labels.
    pub positive_tier: RiskTier,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            positive_tier: RiskTier::Medium,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scoring: ScorerConfig,
    pub trends: TrendRules,
    pub server: ServerConfig,
    pub evaluation: EvaluationConfig,
    pub metrics: Option<MetricsConfig>,
    pub export: Option<ExportConfig>,
}

impl AppConfig {
    /// Load from `$THEFT_DETECTION_CONFIG`, else `theft-detection.toml` when it
    /// exists, else built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let cfg = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if PathBuf::from(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            Err(_) => {
                tracing::info!("no config file found, using defaults");
                Self::default()
            }
        };
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        let cfg = Self::from_toml_str(&contents)?;
        tracing::info!(path, "configuration loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.scoring.validate()?;
        self.trends.validate()?;
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}
