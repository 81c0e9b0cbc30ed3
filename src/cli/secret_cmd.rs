use std::io::BufRead;

use anyhow::{bail, Context, Result};

use crate::core::providers::Provider;
use crate::core::secrets::{
    SecretStore, CLAUDE_CREDENTIALS, CODEX_ACCESS_TOKEN, COPILOT_ACCESS_TOKEN, GEMINI_API_KEY,
    KNOWN_KEYS, OPENROUTER_API_KEY,
};

/// Accept either a store key or a provider id.
fn resolve_key(name: &str) -> Result<&'static str> {
    if let Some(key) = KNOWN_KEYS.iter().copied().find(|k| *k == name) {
        return Ok(key);
    }
    match Provider::from_id(name) {
        Some(Provider::Claude) => Ok(CLAUDE_CREDENTIALS),
        Some(Provider::Codex) => Ok(CODEX_ACCESS_TOKEN),
        Some(Provider::Copilot) => Ok(COPILOT_ACCESS_TOKEN),
        Some(Provider::Gemini) => Ok(GEMINI_API_KEY),
        Some(Provider::OpenRouter) => Ok(OPENROUTER_API_KEY),
        None => bail!(
            "Unknown secret '{}'. Known keys: {}",
            name,
            KNOWN_KEYS.join(", ")
        ),
    }
}

fn read_value_from_stdin() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read secret from stdin")?;
    Ok(line.trim().to_string())
}

pub fn set(store: &dyn SecretStore, name: &str, value: Option<String>) -> Result<()> {
    let key = resolve_key(name)?;
    let value = match value {
        Some(v) => v,
        None => read_value_from_stdin()?,
    };
    if value.is_empty() {
        bail!("Refusing to store an empty value for '{}'", key);
    }
    store.save(&value, key)?;
    println!("Stored {}", key);
    println!("  Running `umon watch` sessions pick this up on SIGHUP.");
    Ok(())
}

pub fn delete(store: &dyn SecretStore, name: &str) -> Result<()> {
    let key = resolve_key(name)?;
    store.delete(key)?;
    println!("Deleted {}", key);
    Ok(())
}

pub fn list(store: &dyn SecretStore) -> Result<()> {
    for key in KNOWN_KEYS {
        let state = match store.read(key) {
            Ok(Some(_)) => "set".to_string(),
            Ok(None) => "-".to_string(),
            Err(e) => format!("unavailable ({e})"),
        };
        println!("  {:<26} {}", key, state);
    }
    Ok(())
}
