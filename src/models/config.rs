//! Configuration models for leadgen.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! Provider settings come from an optional TOML file; the per-invocation
//! request comes from the command line. Credentials are resolved once at
//! start-up and handed to the clients, so no component reads the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for leadgen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Google Maps collector (Apify actor)
    #[serde(default)]
    pub apify: ApifyConfig,

    /// Enrichment provider (Perplexity)
    #[serde(default)]
    pub perplexity: PerplexityConfig,

    /// Checkpoint and export settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Apify API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApifyConfig {
    /// API token (can also be set via APIFY_API_TOKEN env var)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Environment variable name for the API token
    #[serde(default = "default_apify_token_env")]
    pub api_token_env: String,

    #[serde(default = "default_apify_base_url")]
    pub base_url: String,

    /// Actor that crawls Google Maps places
    #[serde(default = "default_actor_id")]
    pub actor_id: String,

    /// Results language code
    #[serde(default = "default_language")]
    pub language: String,

    /// Skip permanently or temporarily closed places
    #[serde(default = "default_true")]
    pub skip_closed: bool,

    /// Ask the actor to scrape contact details (emails)
    #[serde(default = "default_true")]
    pub scrape_contacts: bool,

    /// Delay between run status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_apify_token_env() -> String {
    "APIFY_API_TOKEN".to_string()
}

fn default_apify_base_url() -> String {
    "https://api.apify.com/v2".to_string()
}

fn default_actor_id() -> String {
    "compass~crawler-google-places".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for ApifyConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_token_env: default_apify_token_env(),
            base_url: default_apify_base_url(),
            actor_id: default_actor_id(),
            language: default_language(),
            skip_closed: true,
            scrape_contacts: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Perplexity API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerplexityConfig {
    /// API key (can also be set via PERPLEXITY_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_perplexity_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_perplexity_base_url")]
    pub base_url: String,

    /// Model used for summaries (sonar is the cheapest)
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per lead
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum delay between calls (Tier-0 accounts allow ~50 RPM)
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Environment variable that overrides the delay, in seconds
    #[serde(default = "default_rate_limit_delay_env")]
    pub rate_limit_delay_env: String,
}

fn default_perplexity_key_env() -> String {
    "PERPLEXITY_API_KEY".to_string()
}

fn default_perplexity_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_model() -> String {
    "sonar".to_string()
}

fn default_timeout() -> u64 {
    45
}

fn default_max_retries() -> u32 {
    3
}

fn default_rate_limit_delay_ms() -> u64 {
    1_200
}

fn default_rate_limit_delay_env() -> String {
    "PERPLEXITY_RATE_LIMIT_DELAY".to_string()
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_perplexity_key_env(),
            base_url: default_perplexity_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            rate_limit_delay_env: default_rate_limit_delay_env(),
        }
    }
}

/// Checkpoint and export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for checkpoints and raw scrape dumps
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Attempts before a locked output file is fatal
    #[serde(default = "default_export_max_attempts")]
    pub export_max_attempts: u32,

    /// Linear backoff step between export attempts
    #[serde(default = "default_export_backoff_secs")]
    pub export_backoff_secs: u64,

    /// Re-save the checkpoint after this many enriched leads
    #[serde(default = "default_save_every")]
    pub save_every: usize,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".tmp")
}

fn default_export_max_attempts() -> u32 {
    3
}

fn default_export_backoff_secs() -> u64 {
    3
}

fn default_save_every() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            export_max_attempts: default_export_max_attempts(),
            export_backoff_secs: default_export_backoff_secs(),
            save_every: default_save_every(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the Apify token from config or environment.
    pub fn resolve_apify_token(&self) -> Result<String, ConfigError> {
        resolve_secret(&self.apify.api_token, &self.apify.api_token_env, "apify")
    }

    /// Resolve the Perplexity API key from config or environment.
    pub fn resolve_perplexity_key(&self) -> Result<String, ConfigError> {
        resolve_secret(
            &self.perplexity.api_key,
            &self.perplexity.api_key_env,
            "perplexity",
        )
    }

    /// Inter-call enrichment delay, honoring the env override (seconds, float).
    pub fn resolve_enrich_delay(&self) -> Duration {
        std::env::var(&self.perplexity.rate_limit_delay_env)
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| Duration::from_millis(self.perplexity.rate_limit_delay_ms))
    }
}

fn resolve_secret(
    explicit: &Option<String>,
    env_var: &str,
    provider: &str,
) -> Result<String, ConfigError> {
    if let Some(value) = explicit {
        return Ok(expand_env_vars(value));
    }

    std::env::var(env_var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingApiKey {
            provider: provider.to_string(),
            env_var: env_var.to_string(),
        })
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// The request parameters recorded in every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Search terms, one actor search per entry
    pub queries: Vec<String>,

    /// Free-text location, e.g. "Chicago, USA"
    pub location: String,

    /// Max places per search term
    pub max_results: u32,

    /// Destination spreadsheet
    pub output: PathBuf,
}

/// One invocation's request, as given on the command line.
///
/// `None` means "not given": a fresh run falls back to the defaults,
/// a resumed run adopts the recorded value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub queries: Option<Vec<String>>,
    pub location: Option<String>,
    pub max_results: Option<u32>,
    pub output: Option<PathBuf>,
    /// Run the enrich stage (false = --skip-enrich)
    pub enrich: bool,
    /// Continue from the last checkpoint
    pub resume: bool,
}

pub const DEFAULT_QUERY: &str = "Restaurants";
pub const DEFAULT_LOCATION: &str = "Delhi, India";
pub const DEFAULT_MAX_RESULTS: u32 = 5;
pub const DEFAULT_OUTPUT: &str = "output/leads.csv";

impl RunConfig {
    /// Parameters for a fresh run, with defaults for anything not given.
    pub fn params(&self) -> RunParams {
        RunParams {
            queries: self
                .queries
                .clone()
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_QUERY.to_string()]),
            location: self
                .location
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            max_results: self.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            output: self
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        }
    }

    /// Explicitly given fields that differ from a recorded run.
    ///
    /// Only queries, location and output identify the logical request;
    /// max_results is ignored because collection already happened.
    pub fn conflicts_with(&self, recorded: &RunParams) -> Vec<String> {
        let mut conflicts = Vec::new();

        if let Some(queries) = self.queries.as_ref().filter(|q| !q.is_empty()) {
            if queries != &recorded.queries {
                conflicts.push(format!(
                    "queries {:?} != recorded {:?}",
                    queries, recorded.queries
                ));
            }
        }
        if let Some(location) = &self.location {
            if location.trim() != recorded.location.trim() {
                conflicts.push(format!(
                    "location {location:?} != recorded {:?}",
                    recorded.location
                ));
            }
        }
        if let Some(output) = self.output.as_ref().filter(|o| *o != &recorded.output) {
            conflicts.push(format!(
                "output {} != recorded {}",
                output.display(),
                recorded.output.display()
            ));
        }

        conflicts
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for {provider}: set {env_var} env var or api key in config")]
    MissingApiKey { provider: String, env_var: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.perplexity.model, "sonar");
        assert_eq!(config.perplexity.rate_limit_delay_ms, 1_200);
        assert_eq!(config.apify.actor_id, "compass~crawler-google-places");
        assert_eq!(config.pipeline.work_dir, PathBuf::from(".tmp"));
        assert_eq!(config.pipeline.export_max_attempts, 3);
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leadgen.toml");
        std::fs::write(
            &path,
            r#"
[perplexity]
model = "sonar-pro"
max_retries = 5

[pipeline]
work_dir = "state"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.perplexity.model, "sonar-pro");
        assert_eq!(config.perplexity.max_retries, 5);
        assert_eq!(config.perplexity.timeout_secs, 45);
        assert_eq!(config.pipeline.work_dir, PathBuf::from("state"));
        assert_eq!(config.pipeline.save_every, 1);
    }

    #[test]
    fn test_from_file_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[pipeline\nwork_dir = ").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_secret_wins() {
        let mut config = Config::default();
        config.apify.api_token = Some("apify_api_123".to_string());
        config.apify.api_token_env = "LEADGEN_TEST_UNSET_TOKEN_VAR".to_string();
        assert_eq!(config.resolve_apify_token().unwrap(), "apify_api_123");
    }

    #[test]
    fn test_missing_secret_names_env_var() {
        let mut config = Config::default();
        config.perplexity.api_key_env = "LEADGEN_TEST_UNSET_KEY_VAR".to_string();
        match config.resolve_perplexity_key() {
            Err(ConfigError::MissingApiKey { env_var, .. }) => {
                assert_eq!(env_var, "LEADGEN_TEST_UNSET_KEY_VAR")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_enrich_delay_uses_config_without_env() {
        let mut config = Config::default();
        config.perplexity.rate_limit_delay_env = "LEADGEN_TEST_UNSET_DELAY_VAR".to_string();
        config.perplexity.rate_limit_delay_ms = 300;
        assert_eq!(config.resolve_enrich_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_run_config_defaults() {
        let params = RunConfig::default().params();
        assert_eq!(params.queries, vec!["Restaurants".to_string()]);
        assert_eq!(params.location, "Delhi, India");
        assert_eq!(params.max_results, 5);
        assert_eq!(params.output, PathBuf::from("output/leads.csv"));
    }

    #[test]
    fn test_conflicts_only_for_given_fields() {
        let recorded = RunParams {
            queries: vec!["Plumbers".to_string()],
            location: "Chicago, USA".to_string(),
            max_results: 5,
            output: PathBuf::from("out.csv"),
        };

        let omitted = RunConfig {
            resume: true,
            ..Default::default()
        };
        assert!(omitted.conflicts_with(&recorded).is_empty());

        let same = RunConfig {
            queries: Some(vec!["Plumbers".to_string()]),
            location: Some("Chicago, USA".to_string()),
            max_results: Some(50),
            resume: true,
            ..Default::default()
        };
        assert!(same.conflicts_with(&recorded).is_empty());

        let different = RunConfig {
            queries: Some(vec!["Cafes".to_string()]),
            location: Some("Mumbai, India".to_string()),
            resume: true,
            ..Default::default()
        };
        assert_eq!(different.conflicts_with(&recorded).len(), 2);
    }
}
