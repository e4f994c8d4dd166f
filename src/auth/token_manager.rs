use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::oauth::{GoogleOAuth, Tokens};
use crate::auth::tokens_file::{self, TokensFile};
use crate::auth::{AccessTokenSource, SCOPES, token_store};
use crate::config::Config;

/// Refresh this many seconds before the provider-reported expiry.
const EXPIRY_SKEW_SECS: i64 = 60;
/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME_SECS: i64 = 3500;

/// Hands out Google access tokens: cached file first, then a refresh with
/// the keyring-held refresh token. Never starts the interactive flow on its
/// own; that is `authorize()`, driven from the CLI.
pub struct TokenManager {
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    user_email: String,
    cache_path: PathBuf,
    cached: Mutex<Option<TokensFile>>,
}

impl TokenManager {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client_id = cfg.gmail.client_id.clone();
        let user_email = cfg
            .gmail
            .user_email
            .clone()
            .ok_or_else(|| anyhow!("gmail.user_email not set in config"))?;

        let client_secret = token_store::load_client_secret(&client_id)?
            .or_else(|| std::env::var("OAUTH_CLIENT_SECRET").ok());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: cfg.gmail.redirect_uri.clone(),
            user_email,
            cache_path: tokens_file::tokens_path()?,
            cached: Mutex::new(None),
        })
    }

    fn oauth(&self) -> Result<GoogleOAuth> {
        GoogleOAuth::new(&self.client_id, self.client_secret.as_deref())
    }

    /// Run the browser-based consent flow and persist the result.
    pub fn authorize(&self) -> Result<()> {
        let tokens = self
            .oauth()?
            .authorize_interactive(&self.redirect_uri, SCOPES)?;
        match &tokens.refresh_token {
            Some(rt) => {
                token_store::save_refresh_token(&self.user_email, rt)?;
                info!("saved refresh token into keyring for {}", self.user_email);
            }
            None => warn!("provider returned no refresh token; re-run authorize with consent"),
        }
        self.remember(&tokens)?;
        Ok(())
    }

    fn remember(&self, tokens: &Tokens) -> Result<String> {
        let now = now_epoch()?;
        let exp = tokens
            .expires_in
            .map(|s| now + s as i64)
            .unwrap_or(now + DEFAULT_LIFETIME_SECS);
        let tf = TokensFile {
            access_token: Some(tokens.access_token.clone()),
            expires_at_epoch: Some(exp),
        };
        if let Err(e) = tokens_file::save_tokens(&self.cache_path, &tf) {
            warn!("couldn't save token cache: {e}");
        }
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(tf);
        }
        Ok(tokens.access_token.clone())
    }
}

impl AccessTokenSource for TokenManager {
    fn access_token(&self) -> Result<String> {
        let now = now_epoch()?;

        if let Ok(guard) = self.cached.lock()
            && let Some(at) = guard.as_ref().and_then(|tf| tf.valid_token(now, EXPIRY_SKEW_SECS))
        {
            return Ok(at.to_string());
        }

        if let Some(tf) = tokens_file::load_tokens(&self.cache_path)?
            && let Some(at) = tf.valid_token(now, EXPIRY_SKEW_SECS)
        {
            let at = at.to_string();
            if let Ok(mut guard) = self.cached.lock() {
                *guard = Some(tf);
            }
            return Ok(at);
        }

        let rt = token_store::load_refresh_token(&self.user_email)?.ok_or_else(|| {
            anyhow!(
                "no refresh token for {}; run `mail_relay authorize` first",
                self.user_email
            )
        })?;

        debug!("access token expired, refreshing");
        let tokens = self.oauth()?.refresh(&rt)?;
        if let Some(new_rt) = &tokens.refresh_token
            && let Err(e) = token_store::save_refresh_token(&self.user_email, new_rt)
        {
            warn!("couldn't save rotated refresh token: {e}");
        }
        self.remember(&tokens)
    }
}

fn now_epoch() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}
