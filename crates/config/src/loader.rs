use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::bail;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{Config, StorageConfig};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    let config = from_toml_str(&content)?;

    for warning in validate_rate_limits(&config) {
        log::warn!("{warning}");
    }

    Ok(config)
}

fn from_toml_str(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;
    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    Ok(Config::deserialize(raw_config)?)
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Checks the rate limit section for setups that load fine but probably do not do what the operator wants.
///
/// Quota values themselves are validated when the rate limiter is built.
pub(crate) fn validate_rate_limits(config: &Config) -> Vec<String> {
    let rate_limits = &config.server.rate_limits;
    let mut warnings = Vec::new();

    if !rate_limits.enabled {
        if !rate_limits.clients.is_empty() {
            warnings.push(format!(
                "{} client quota(s) are configured but rate limiting is disabled. Set enabled = true in [server.rate_limits] to enforce them",
                rate_limits.clients.len()
            ));
        }

        return warnings;
    }

    if rate_limits.clients.is_empty() {
        warnings.push(
            "Rate limiting is enabled but no client quotas are configured. Every request is handled by the unknown_clients policy"
                .to_string(),
        );
    }

    if matches!(rate_limits.storage, StorageConfig::Memory) {
        warnings.push(
            "Rate limiting uses in-memory storage. Counters are not shared between instances; configure Redis storage when running more than one"
                .to_string(),
        );
    }

    warnings
}
