//! Runtime configuration
//!
//! Loaded from `aigne.toml` (optional) and merged with the environment.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags (applied by the caller)
//! 2. Environment variables (`OPENAI_API_KEY`, `AIGNE_PROVIDER`, ...)
//! 3. Config file
//! 4. Defaults

use std::fs;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AigneError;
use crate::template::DEFAULT_CONCURRENCY;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model provider name (openai, mock)
    pub provider: String,
    /// Model used when an agent does not name one
    pub model: String,
    /// Resolver tasks a template render runs at once
    pub template_concurrency: usize,
    pub openai: OpenAiSettings,
    pub http: HttpSettings,
    pub function: FunctionSettings,
    /// Component name → base URL
    pub components: IndexMap<String, String>,
    /// Secrets available to API agents; the environment is consulted as fallback
    pub secrets: IndexMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            template_concurrency: DEFAULT_CONCURRENCY,
            openai: OpenAiSettings::default(),
            http: HttpSettings::default(),
            function: FunctionSettings::default(),
            components: IndexMap::new(),
            secrets: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FunctionSettings {
    /// Program that receives the function code via `-c`
    pub interpreter: String,
    pub timeout_secs: u64,
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            interpreter: "sh".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AigneError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| AigneError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Like [`RuntimeConfig::load`], but a missing file yields defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, AigneError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AigneError> {
        let config: Self = toml::from_str(content).map_err(|e| AigneError::Config {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, AigneError> {
        toml::to_string_pretty(self).map_err(|e| AigneError::Config {
            reason: format!("Failed to serialize config: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Some(provider) = non_empty("AIGNE_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = non_empty("AIGNE_MODEL") {
            self.model = model;
        }
        self
    }

    pub fn validate(&self) -> Result<(), AigneError> {
        if self.template_concurrency == 0 {
            return Err(AigneError::Config {
                reason: "template_concurrency must be at least 1".to_string(),
            });
        }
        for (name, base) in &self.components {
            parse_base_url(name, base)?;
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }

    pub fn function_timeout(&self) -> Duration {
        Duration::from_secs(self.function.timeout_secs)
    }

    /// Base URL of a configured component, with a trailing slash
    pub fn component_url(&self, component: &str) -> Result<Url, AigneError> {
        let base = self
            .components
            .get(component)
            .ok_or_else(|| AigneError::UnknownComponent {
                component: component.to_string(),
            })?;
        parse_base_url(component, base)
    }
}

fn parse_base_url(component: &str, base: &str) -> Result<Url, AigneError> {
    // Without the trailing slash Url::join would drop the last path segment
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Url::parse(&normalized).map_err(|e| AigneError::Config {
        reason: format!("Invalid base URL for component '{}': {}", component, e),
    })
}
