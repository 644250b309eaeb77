//! Resolving the user behind a like.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::UsersConfig;

#[derive(Debug, thiserror::Error)]
pub enum UserLookupError {
    #[error("User lookup failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("User lookup returned {0}")]
    Status(reqwest::StatusCode),
}

/// Source of the current user's id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn current_user(&self) -> Result<i64, UserLookupError>;
}

#[derive(Deserialize)]
struct UserResponse {
    id: i64,
}

/// Asks an HTTP endpoint returning `{"id": n}`.
pub struct HttpUserDirectory {
    client: reqwest::Client,
    url: String,
}

impl HttpUserDirectory {
    pub fn new(config: &UsersConfig) -> Result<Self, UserLookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn current_user(&self) -> Result<i64, UserLookupError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(UserLookupError::Status(response.status()));
        }
        let user: UserResponse = response.json().await?;
        Ok(user.id)
    }
}

/// Always answers with the same user.
pub struct FixedUser(pub i64);

#[async_trait]
impl UserDirectory for FixedUser {
    async fn current_user(&self) -> Result<i64, UserLookupError> {
        Ok(self.0)
    }
}
