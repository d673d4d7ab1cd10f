//! Federated identity verification.
//!
//! The client signs in with an external provider and hands the resulting ID
//! token to the server. The server never sees passwords; it only asks the
//! provider who the token belongs to.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::AppError;

/// Identity asserted by the provider for a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Provider-stable subject; used as the user id.
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<FederatedIdentity, AppError>;
}

/// Google 互換の tokeninfo エンドポイントで ID トークンを検証する。
#[derive(Debug, Clone)]
pub struct TokenInfoVerifier {
    client: reqwest::Client,
    endpoint: String,
    audience: Option<String>,
}

#[derive(Deserialize)]
struct TokenInfo {
    sub: String,
    email: Option<String>,
    /// tokeninfo は真偽値を文字列で返す
    email_verified: Option<String>,
    name: Option<String>,
    aud: Option<String>,
}

impl TokenInfoVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.identity_tokeninfo_url.clone(),
            audience: config.identity_audience.clone(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for TokenInfoVerifier {
    async fn verify(&self, credential: &str) -> Result<FederatedIdentity, AppError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("identity provider unreachable: {e}")))?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(AppError::Unauthenticated("credential rejected".into()));
        }
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "identity provider returned {status}"
            )));
        }

        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid identity response: {e}")))?;
        identity_from_token_info(info, self.audience.as_deref())
    }
}

fn identity_from_token_info(
    info: TokenInfo,
    audience: Option<&str>,
) -> Result<FederatedIdentity, AppError> {
    if let Some(expected) = audience
        && info.aud.as_deref() != Some(expected)
    {
        return Err(AppError::Unauthenticated(
            "credential issued for another client".into(),
        ));
    }
    let email = info
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("credential carries no email".into()))?;
    if info.email_verified.as_deref() != Some("true") {
        return Err(AppError::Unauthenticated("email is not verified".into()));
    }
    Ok(FederatedIdentity {
        subject: info.sub,
        email,
        display_name: info.name.filter(|n| !n.trim().is_empty()),
    })
}
