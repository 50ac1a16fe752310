use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use supportflow_core::config::{
    AppConfig, LoadOptions, ProviderConfig, DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE,
};
use toml::Value;

struct Field<'a> {
    key: &'static str,
    value: String,
    env_keys: &'a [&'static str],
}

pub fn run(config_path: Option<&Path>) -> String {
    let options =
        LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path(config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source =
            field_source(field.key, field.env_keys, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field<'static>> {
    let stages = match &config.stages {
        Some(stages) => format!("custom ({} stages)", stages.len()),
        None => "canonical".to_string(),
    };

    vec![
        Field {
            key: "providers.common.endpoint",
            value: config.providers.common.endpoint.clone(),
            env_keys: &["SUPPORTFLOW_COMMON_ENDPOINT"],
        },
        Field {
            key: "providers.common.api_key",
            value: redact_key(&config.providers.common),
            env_keys: &["SUPPORTFLOW_COMMON_API_KEY"],
        },
        Field {
            key: "providers.atlas.endpoint",
            value: config.providers.atlas.endpoint.clone(),
            env_keys: &["SUPPORTFLOW_ATLAS_ENDPOINT"],
        },
        Field {
            key: "providers.atlas.api_key",
            value: redact_key(&config.providers.atlas),
            env_keys: &["SUPPORTFLOW_ATLAS_API_KEY"],
        },
        Field {
            key: "dispatch.max_attempts",
            value: config.dispatch.max_attempts.to_string(),
            env_keys: &["SUPPORTFLOW_DISPATCH_MAX_ATTEMPTS"],
        },
        Field {
            key: "dispatch.timeout_ms",
            value: config.dispatch.timeout_ms.to_string(),
            env_keys: &["SUPPORTFLOW_DISPATCH_TIMEOUT_MS"],
        },
        Field {
            key: "dispatch.backoff_base_ms",
            value: config.dispatch.backoff_base_ms.to_string(),
            env_keys: &["SUPPORTFLOW_DISPATCH_BACKOFF_BASE_MS"],
        },
        Field {
            key: "dispatch.backoff_multiplier",
            value: config.dispatch.backoff_multiplier.to_string(),
            env_keys: &["SUPPORTFLOW_DISPATCH_BACKOFF_MULTIPLIER"],
        },
        Field {
            key: "decision.seed",
            value: config
                .decision
                .seed
                .map_or_else(|| "<unset>".to_string(), |seed| seed.to_string()),
            env_keys: &["SUPPORTFLOW_DECISION_SEED"],
        },
        Field {
            key: "decision.update_policy",
            value: config.decision.update_policy.as_str().to_string(),
            env_keys: &["SUPPORTFLOW_DECISION_UPDATE_POLICY"],
        },
        Field {
            key: "knowledge.rules",
            value: format!("{} rules", config.knowledge.rules.len()),
            env_keys: &[],
        },
        Field { key: "stages", value: stages, env_keys: &[] },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SUPPORTFLOW_LOGGING_LEVEL", "SUPPORTFLOW_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_lowercase(),
            env_keys: &["SUPPORTFLOW_LOGGING_FORMAT", "SUPPORTFLOW_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    match (file_doc, file_path) {
        (Some(doc), Some(path)) if contains_path(doc, key_path) => {
            format!("file ({})", path.display())
        }
        _ => "default".to_string(),
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

fn redact_key(provider: &ProviderConfig) -> String {
    let shown = if provider.api_key.is_some() { "<redacted>" } else { "<unset>" };
    shown.to_string()
}
