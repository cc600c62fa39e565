use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// How strictly incoming date windows are checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DateValidation {
    #[serde(rename = "lenient")]
    #[default]
    Lenient,
    #[serde(rename = "strict")]
    Strict,
}

impl FromStr for DateValidation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(DateValidation::Lenient),
            "strict" => Ok(DateValidation::Strict),
            other => Err(anyhow!("DATE_VALIDATION must be 'lenient' or 'strict', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResearchMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "remote")]
    #[default]
    Remote,
}

impl FromStr for ResearchMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ResearchMode::Local),
            "remote" => Ok(ResearchMode::Remote),
            other => Err(anyhow!("RESEARCH_MODE must be 'local' or 'remote', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            CorsOrigins::Any
        } else {
            CorsOrigins::List(origins)
        }
    }
}

/// Settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub cors_origins: CorsOrigins,
}

/// Settings for the default research engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub research_mode: ResearchMode,
    pub perplexity_api_key: Option<String>,
    #[serde(default = "default_perplexity_model")]
    pub perplexity_model: String,
    pub groq_api_key: Option<String>,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    #[serde(default = "default_local_llm")]
    pub local_llm: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            research_mode: ResearchMode::default(),
            perplexity_api_key: None,
            perplexity_model: default_perplexity_model(),
            groq_api_key: None,
            groq_model: default_groq_model(),
            local_llm: default_local_llm(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub date_validation: DateValidation,
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

fn default_perplexity_model() -> String {
    "sonar-pro".to_string()
}

fn default_local_llm() -> String {
    "deepseek-r1:8b".to_string()
}

fn default_groq_model() -> String {
    "mixtral-8x7b-32768".to_string()
}

const ENV_VARS: [&str; 11] = [
    "API_KEY",
    "HOST",
    "PORT",
    "CORS_ORIGINS",
    "DATE_VALIDATION",
    "RESEARCH_MODE",
    "PERPLEXITY_API_KEY",
    "PERPLEXITY_MODEL",
    "GROQ_API_KEY",
    "GROQ_MODEL",
    "LOCAL_LLM",
];

impl Configuration {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        tracing::debug!("Loading configuration...");

        for var in ENV_VARS.iter() {
            match lookup(var) {
                Some(value) => tracing::debug!(
                    "Found env var {}: {}",
                    var,
                    if var.contains("KEY") { "***".to_string() } else { value }
                ),
                None => tracing::debug!("{} not set, using default", var),
            }
        }

        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let port = match non_empty("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("PORT must be a valid port number, got '{}': {}", raw, e))?,
            None => DEFAULT_PORT,
        };

        let server = ServerSettings {
            host: non_empty("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            api_key: non_empty("API_KEY"),
            cors_origins: CorsOrigins::parse(&non_empty("CORS_ORIGINS").unwrap_or_default()),
        };

        let research_mode = non_empty("RESEARCH_MODE")
            .map(|raw| raw.parse::<ResearchMode>())
            .transpose()?
            .unwrap_or_default();

        let engine = EngineSettings {
            research_mode,
            perplexity_api_key: non_empty("PERPLEXITY_API_KEY"),
            perplexity_model: non_empty("PERPLEXITY_MODEL").unwrap_or_else(default_perplexity_model),
            groq_api_key: non_empty("GROQ_API_KEY"),
            groq_model: non_empty("GROQ_MODEL").unwrap_or_else(default_groq_model),
            local_llm: non_empty("LOCAL_LLM").unwrap_or_else(default_local_llm),
        };

        let date_validation = non_empty("DATE_VALIDATION")
            .map(|raw| raw.parse::<DateValidation>())
            .transpose()?
            .unwrap_or_default();

        Ok(Configuration {
            server,
            engine,
            date_validation,
        })
    }

    /// The bearer secret, which must be set before the server accepts traffic.
    pub fn require_api_key(&self) -> Result<&str> {
        self.server
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("API_KEY environment variable not found - please add this to your .env file"))
    }
}
