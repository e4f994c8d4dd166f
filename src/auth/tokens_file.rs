use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Cached access token metadata (non-secret refresh data lives in the keyring).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensFile {
    pub access_token: Option<String>,
    pub expires_at_epoch: Option<i64>, // epoch seconds
}

impl TokensFile {
    /// Returns the cached token when it is still valid `skew_secs` from `now`.
    pub fn valid_token(&self, now: i64, skew_secs: i64) -> Option<&str> {
        match (&self.access_token, self.expires_at_epoch) {
            (Some(at), Some(exp)) if now + skew_secs < exp => Some(at.as_str()),
            _ => None,
        }
    }
}

pub fn tokens_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("mail_relay");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("tokens.json"))
}

pub fn save_tokens(path: &Path, tokens: &TokensFile) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(tokens)?)?;
    Ok(())
}

pub fn load_tokens(path: &Path) -> Result<Option<TokensFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&s)?))
}
