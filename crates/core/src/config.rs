use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{DispatchPolicy, ProviderEndpoint, ProviderId};
use crate::knowledge::{default_rules, KeywordKnowledgeBase, KnowledgeRule};
use crate::pipeline::{StageRegistry, StageSpec, UpdatePolicy};

pub const DEFAULT_CONFIG_FILE: &str = "supportflow.toml";
pub const NESTED_CONFIG_FILE: &str = "config/supportflow.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub providers: ProvidersConfig,
    pub dispatch: DispatchConfig,
    pub decision: DecisionConfig,
    pub knowledge: KnowledgeConfig,
    /// Full stage table; `None` keeps the canonical registry.
    pub stages: Option<Vec<StageSpec>>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub common: ProviderConfig,
    pub atlas: ProviderConfig,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: u32,
}

#[derive(Clone, Debug)]
pub struct DecisionConfig {
    pub seed: Option<u64>,
    pub update_policy: UpdatePolicy,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub rules: Vec<KnowledgeRule>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub common_endpoint: Option<String>,
    pub atlas_endpoint: Option<String>,
    pub max_attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub seed: Option<u64>,
    pub update_policy: Option<UpdatePolicy>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let defaults = DispatchPolicy::default();
        Self {
            providers: ProvidersConfig {
                common: ProviderConfig { endpoint: "local://common".to_string(), api_key: None },
                atlas: ProviderConfig { endpoint: "local://atlas".to_string(), api_key: None },
            },
            dispatch: DispatchConfig {
                max_attempts: defaults.max_attempts,
                timeout_ms: duration_ms(defaults.timeout),
                backoff_base_ms: duration_ms(defaults.backoff_base),
                backoff_multiplier: defaults.backoff_multiplier,
            },
            decision: DecisionConfig { seed: None, update_policy: UpdatePolicy::Restate },
            knowledge: KnowledgeConfig { rules: default_rules() },
            stages: None,
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

fn parse_update_policy(key: &str, value: &str) -> Result<UpdatePolicy, ConfigError> {
    UpdatePolicy::parse(value).ok_or_else(|| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(providers) = patch.providers {
            if let Some(common) = providers.common {
                apply_provider_patch(&mut self.providers.common, common);
            }
            if let Some(atlas) = providers.atlas {
                apply_provider_patch(&mut self.providers.atlas, atlas);
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(max_attempts) = dispatch.max_attempts {
                self.dispatch.max_attempts = max_attempts;
            }
            if let Some(timeout_ms) = dispatch.timeout_ms {
                self.dispatch.timeout_ms = timeout_ms;
            }
            if let Some(backoff_base_ms) = dispatch.backoff_base_ms {
                self.dispatch.backoff_base_ms = backoff_base_ms;
            }
            if let Some(backoff_multiplier) = dispatch.backoff_multiplier {
                self.dispatch.backoff_multiplier = backoff_multiplier;
            }
        }

        if let Some(decision) = patch.decision {
            if let Some(seed) = decision.seed {
                self.decision.seed = Some(seed);
            }
            if let Some(update_policy) = decision.update_policy {
                self.decision.update_policy = update_policy;
            }
        }

        if let Some(rules) = patch.knowledge.and_then(|knowledge| knowledge.rules) {
            self.knowledge.rules = rules;
        }

        if let Some(stages) = patch.stages {
            self.stages = Some(stages);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SUPPORTFLOW_COMMON_ENDPOINT") {
            self.providers.common.endpoint = value;
        }
        if let Some(value) = read_env("SUPPORTFLOW_COMMON_API_KEY") {
            self.providers.common.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SUPPORTFLOW_ATLAS_ENDPOINT") {
            self.providers.atlas.endpoint = value;
        }
        if let Some(value) = read_env("SUPPORTFLOW_ATLAS_API_KEY") {
            self.providers.atlas.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("SUPPORTFLOW_DISPATCH_MAX_ATTEMPTS") {
            self.dispatch.max_attempts = parse_u32("SUPPORTFLOW_DISPATCH_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTFLOW_DISPATCH_TIMEOUT_MS") {
            self.dispatch.timeout_ms = parse_u64("SUPPORTFLOW_DISPATCH_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTFLOW_DISPATCH_BACKOFF_BASE_MS") {
            self.dispatch.backoff_base_ms =
                parse_u64("SUPPORTFLOW_DISPATCH_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTFLOW_DISPATCH_BACKOFF_MULTIPLIER") {
            self.dispatch.backoff_multiplier =
                parse_u32("SUPPORTFLOW_DISPATCH_BACKOFF_MULTIPLIER", &value)?;
        }

        if let Some(value) = read_env("SUPPORTFLOW_DECISION_SEED") {
            self.decision.seed = Some(parse_u64("SUPPORTFLOW_DECISION_SEED", &value)?);
        }
        if let Some(value) = read_env("SUPPORTFLOW_DECISION_UPDATE_POLICY") {
            self.decision.update_policy =
                parse_update_policy("SUPPORTFLOW_DECISION_UPDATE_POLICY", &value)?;
        }

        let log_level =
            read_env("SUPPORTFLOW_LOGGING_LEVEL").or_else(|| read_env("SUPPORTFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SUPPORTFLOW_LOGGING_FORMAT").or_else(|| read_env("SUPPORTFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(common_endpoint) = overrides.common_endpoint {
            self.providers.common.endpoint = common_endpoint;
        }
        if let Some(atlas_endpoint) = overrides.atlas_endpoint {
            self.providers.atlas.endpoint = atlas_endpoint;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.dispatch.max_attempts = max_attempts;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.dispatch.timeout_ms = timeout_ms;
        }
        if let Some(seed) = overrides.seed {
            self.decision.seed = Some(seed);
        }
        if let Some(update_policy) = overrides.update_policy {
            self.decision.update_policy = update_policy;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_providers(&self.providers)?;
        validate_dispatch(&self.dispatch)?;
        validate_knowledge(&self.knowledge)?;
        self.registry()?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// The configured stage table, or the canonical one when none is configured.
    pub fn registry(&self) -> Result<StageRegistry, ConfigError> {
        match &self.stages {
            None => Ok(StageRegistry::canonical()),
            Some(specs) => StageRegistry::from_specs(specs)
                .map_err(|error| ConfigError::Validation(format!("stages: {error}"))),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_attempts: self.dispatch.max_attempts,
            timeout: Duration::from_millis(self.dispatch.timeout_ms),
            backoff_base: Duration::from_millis(self.dispatch.backoff_base_ms),
            backoff_multiplier: self.dispatch.backoff_multiplier,
        }
    }

    pub fn knowledge_base(&self) -> KeywordKnowledgeBase {
        KeywordKnowledgeBase::new(self.knowledge.rules.clone())
    }

    pub fn provider_endpoint(&self, id: ProviderId) -> ProviderEndpoint {
        let provider = match id {
            ProviderId::Common => &self.providers.common,
            ProviderId::Atlas => &self.providers.atlas,
        };
        let endpoint = ProviderEndpoint::new(id, provider.endpoint.trim());
        match &provider.api_key {
            Some(api_key) => endpoint.with_api_key(api_key.clone()),
            None => endpoint,
        }
    }
}

fn apply_provider_patch(provider: &mut ProviderConfig, patch: ProviderPatch) {
    if let Some(endpoint) = patch.endpoint {
        provider.endpoint = endpoint;
    }
    if let Some(api_key_value) = patch.api_key {
        provider.api_key = Some(secret_value(api_key_value));
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_providers(providers: &ProvidersConfig) -> Result<(), ConfigError> {
    for (section, provider) in
        [("providers.common", &providers.common), ("providers.atlas", &providers.atlas)]
    {
        validate_endpoint(section, &provider.endpoint)?;

        let blank_key =
            provider.api_key.as_ref().is_some_and(|key| key.expose_secret().trim().is_empty());
        if blank_key {
            return Err(ConfigError::Validation(format!(
                "{section}.api_key is set but empty; remove it or provide a key"
            )));
        }
    }

    if providers.common.endpoint.trim() == providers.atlas.endpoint.trim() {
        return Err(ConfigError::Validation(
            "providers.common.endpoint and providers.atlas.endpoint must be distinct".to_string(),
        ));
    }

    Ok(())
}

fn validate_endpoint(section: &str, endpoint: &str) -> Result<(), ConfigError> {
    let endpoint = endpoint.trim();
    let rest = ["http://", "https://", "local://"]
        .into_iter()
        .find_map(|scheme| endpoint.strip_prefix(scheme));

    match rest {
        Some(rest) if !rest.is_empty() => Ok(()),
        Some(_) => Err(ConfigError::Validation(format!(
            "{section}.endpoint `{endpoint}` is missing a host or name after the scheme"
        ))),
        None => Err(ConfigError::Validation(format!(
            "{section}.endpoint must start with http://, https:// or local:// (got `{endpoint}`)"
        ))),
    }
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if dispatch.max_attempts == 0 || dispatch.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "dispatch.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if dispatch.timeout_ms == 0 || dispatch.timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "dispatch.timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if dispatch.backoff_base_ms > 60_000 {
        return Err(ConfigError::Validation(
            "dispatch.backoff_base_ms must not exceed 60000".to_string(),
        ));
    }

    if dispatch.backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "dispatch.backoff_multiplier must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    for (index, rule) in knowledge.rules.iter().enumerate() {
        if rule.keyword.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "knowledge.rules[{index}].keyword must not be empty"
            )));
        }
        if rule.answer.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "knowledge.rules[{index}].answer must not be empty (keyword `{}`)",
                rule.keyword
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    providers: Option<ProvidersPatch>,
    dispatch: Option<DispatchPatch>,
    decision: Option<DecisionPatch>,
    knowledge: Option<KnowledgePatch>,
    stages: Option<Vec<StageSpec>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    common: Option<ProviderPatch>,
    atlas: Option<ProviderPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    endpoint: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    max_attempts: Option<u32>,
    timeout_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_multiplier: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DecisionPatch {
    seed: Option<u64>,
    update_policy: Option<UpdatePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    rules: Option<Vec<KnowledgeRule>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
