pub mod oauth;
pub mod token_manager;
pub mod token_store;
pub mod tokens_file;

use anyhow::Result;

/// Scopes the relay needs: read mail and pull from the notification topic.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/pubsub",
];

/// Anything that can hand out a bearer token for Google APIs.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and for operators who mint tokens externally.
pub struct StaticToken(pub String);

impl AccessTokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
