use serde::Deserialize;

use super::client::AniListClient;
use super::error::AniListError;
use crate::oauth::{self, REDIRECT_URI};
use crate::traits::{ServiceProvider, TokenGrant};

const AUTH_URL: &str = "https://anilist.co/api/v2/oauth/authorize";
const TOKEN_URL: &str = "https://anilist.co/api/v2/oauth/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// AniList credentials and client factory.
#[derive(Debug, Clone)]
pub struct AniListProvider {
    client_id: String,
    client_secret: String,
}

impl AniListProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    async fn token_request(&self, body: serde_json::Value) -> Result<TokenGrant, AniListError> {
        let resp = crate::http::client()
            .post(TOKEN_URL)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AniListError::Api {
                status,
                message: body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AniListError::Parse(e.to_string()))?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}

impl ServiceProvider for AniListProvider {
    type Error = AniListError;
    type Client = AniListClient;

    const NAME: &'static str = "anilist";

    fn client(&self, access_token: &str) -> AniListClient {
        AniListClient::new(access_token.to_string())
    }

    /// Authorization Code Grant: open the consent page, catch the redirect on
    /// the loopback port, then exchange the code for a token.
    async fn authorize(&self) -> Result<TokenGrant, AniListError> {
        let auth_url = format!(
            "{AUTH_URL}?client_id={}&redirect_uri={REDIRECT_URI}&response_type=code",
            self.client_id
        );

        tracing::info!("opening AniList authorization URL in browser");
        oauth::open_browser(&auth_url).map_err(AniListError::Auth)?;
        let code = oauth::listen_for_redirect()
            .await
            .map_err(AniListError::Auth)?;

        self.token_request(serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "redirect_uri": REDIRECT_URI,
            "code": code,
        }))
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AniListError> {
        self.token_request(serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "refresh_token": refresh_token,
        }))
        .await
    }
}
