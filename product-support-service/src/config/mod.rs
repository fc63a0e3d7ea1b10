use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Region used when `GOOGLE_CLOUD_LOCATION` is not set.
const DEFAULT_LOCATION: &str = "asia-northeast1";

const DEFAULT_TEXT_MODEL: &str = "gemini-pro";

/// Timeout applied to each model call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Largest product photo accepted by the multipart endpoint (20MB).
const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ProductSupportConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub google: GoogleConfig,
    pub models: ModelConfig,
    pub uploads: UploadConfig,
}

/// Credentials and placement for the Gemini API.
///
/// When `api_key` is set the Gemini Developer API is used; otherwise calls go
/// to Vertex AI in `project_id`/`location`, authenticated with `access_token`
/// or a token from the instance metadata server.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub project_id: Option<String>,
    pub location: String,
    pub access_token: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub text_model: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<i32>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_image_bytes: usize,
}

impl ProductSupportConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| {
            env::var(key).ok().filter(|v| !v.trim().is_empty())
        })
    }

    /// Build the configuration from `common` and a variable lookup.
    ///
    /// `PORT` (set by Cloud Run) overrides `common.port`.
    pub fn from_lookup<F>(mut common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var::<u16, _>(&lookup, "PORT")? {
            common.port = port;
        }

        Ok(ProductSupportConfig {
            common,
            google: GoogleConfig {
                project_id: lookup("GOOGLE_CLOUD_PROJECT"),
                location: lookup("GOOGLE_CLOUD_LOCATION")
                    .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                access_token: lookup("GOOGLE_ACCESS_TOKEN"),
                api_key: lookup("GOOGLE_API_KEY"),
            },
            models: ModelConfig {
                text_model: lookup("GENAI_TEXT_MODEL")
                    .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
                temperature: parse_var(&lookup, "GENAI_TEMPERATURE")?,
                max_output_tokens: parse_var(&lookup, "GENAI_MAX_OUTPUT_TOKENS")?,
                request_timeout_secs: parse_var(&lookup, "GENAI_REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            uploads: UploadConfig {
                max_image_bytes: parse_var(&lookup, "MAX_IMAGE_BYTES")?
                    .unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            },
        })
    }

    /// Configuration suitable for tests: random port, Vertex AI placeholders.
    pub fn for_tests() -> Self {
        let common = core_config::Config {
            port: 0,
            ..Default::default()
        };

        ProductSupportConfig {
            common,
            google: GoogleConfig {
                project_id: Some("test-project".to_string()),
                location: DEFAULT_LOCATION.to_string(),
                access_token: Some("test-token".to_string()),
                api_key: None,
            },
            models: ModelConfig {
                text_model: DEFAULT_TEXT_MODEL.to_string(),
                temperature: None,
                max_output_tokens: None,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            uploads: UploadConfig {
                max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            },
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!(
                    "{} has invalid value {:?}: {}",
                    key,
                    raw,
                    e
                ))
            })
        })
        .transpose()
}
