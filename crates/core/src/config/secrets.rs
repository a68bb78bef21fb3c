//! Secrets and environment expansion.

use anyhow::Result;
use regex_lite::Regex;

/// Environment variable names.
pub mod env {
    pub const ALCHEMY_KEY: &str = "ALCHEMY_KEY";
    pub const DUNE_API_KEY: &str = "DUNE_API_KEY";
}

/// External API credentials. Both are required before anything is fetched.
#[derive(Clone)]
pub struct Secrets {
    pub alchemy_key: String,
    pub dune_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("alchemy_key", &"<redacted>")
            .field("dune_api_key", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Read secrets from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            alchemy_key: required_env(env::ALCHEMY_KEY)?,
            dune_api_key: required_env(env::DUNE_API_KEY)?,
        })
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            env::ALCHEMY_KEY => Some(self.alchemy_key.clone()),
            env::DUNE_API_KEY => Some(self.dune_api_key.clone()),
            _ => std::env::var(name).ok(),
        }
    }

    /// Expand `${VAR}` references, taking secret names from these secrets
    /// and anything else from the environment.
    pub fn expand(&self, value: &str) -> Result<String> {
        expand_with(value, |name| self.lookup(name))
    }
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(anyhow::anyhow!("Missing env var: {}", name)),
    }
}

/// Replace every `${VAR}` in `value` with the variable's value.
///
/// Unset variables are an error so that a URL never goes out with a
/// placeholder in it.
pub fn expand_env(value: &str) -> Result<String> {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    let mut expanded = String::with_capacity(value.len());
    let mut last = 0;
    for caps in pattern.captures_iter(value) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let resolved = lookup(name.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing env var: {}", name.as_str()))?;
        expanded.push_str(&value[last..whole.start()]);
        expanded.push_str(&resolved);
        last = whole.end();
    }
    expanded.push_str(&value[last..]);

    Ok(expanded)
}
