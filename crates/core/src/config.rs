use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::expense::Participants;
use super::money::Money;

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub participants: Participants,
    pub ocr: OcrSettings,
    pub extraction: ExtractionSettings,
    pub storage: StorageSettings,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub vision_api_key: Option<String>,
    pub vision_endpoint: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub tesseract_data_path: Option<String>,
    pub tesseract_lang: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        OcrSettings {
            vision_api_key: None,
            vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            tesseract_data_path: None,
            tesseract_lang: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Allowed gap between item sum and total, as a fraction of the total.
    pub sum_tolerance: f64,
    pub review_threshold: f32,
    pub suspicious_item_price: Money,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        ExtractionSettings {
            sum_tolerance: 0.05,
            review_threshold: 0.6,
            suspicious_item_price: Money::from_cents(100_000),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path` when it exists, falls back to defaults otherwise, then
    /// applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&content)?
        } else {
            AppConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOOGLE_VISION_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.ocr.vision_api_key = Some(key);
        }
        if let Some(raw) = lookup("GOOGLE_VISION_TIMEOUT") {
            self.ocr.timeout_secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "GOOGLE_VISION_TIMEOUT",
                reason: format!("'{raw}' is not a whole number of seconds"),
            })?;
        }
        if let Some(raw) = lookup("GOOGLE_VISION_MAX_RETRIES") {
            self.ocr.max_retries = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "GOOGLE_VISION_MAX_RETRIES",
                reason: format!("'{raw}' is not a whole number"),
            })?;
        }
        if let Some(dir) = lookup("HALVES_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.timeout_secs < 1 {
            return Err(ConfigError::Invalid {
                key: "ocr.timeout_secs",
                reason: "must be at least 1 second".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.extraction.sum_tolerance) {
            return Err(ConfigError::Invalid {
                key: "extraction.sum_tolerance",
                reason: format!("{} is outside [0, 1]", self.extraction.sum_tolerance),
            });
        }
        if !(0.0..=1.0).contains(&self.extraction.review_threshold) {
            return Err(ConfigError::Invalid {
                key: "extraction.review_threshold",
                reason: format!("{} is outside [0, 1]", self.extraction.review_threshold),
            });
        }
        if !self.extraction.suspicious_item_price.is_positive() {
            return Err(ConfigError::Invalid {
                key: "extraction.suspicious_item_price",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
