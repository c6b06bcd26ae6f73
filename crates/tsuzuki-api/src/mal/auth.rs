use serde::Deserialize;

use super::client::MalClient;
use super::error::MalError;
use crate::oauth::{self, REDIRECT_URI};
use crate::traits::{ServiceProvider, TokenGrant};

const AUTH_URL: &str = "https://myanimelist.net/v1/oauth2/authorize";
const TOKEN_URL: &str = "https://myanimelist.net/v1/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// MyAnimeList credentials and client factory.
#[derive(Debug, Clone)]
pub struct MalProvider {
    client_id: String,
}

impl MalProvider {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, MalError> {
        let resp = crate::http::client()
            .post(TOKEN_URL)
            .form(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MalError::Api {
                status,
                message: body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| MalError::Parse(e.to_string()))?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}

impl ServiceProvider for MalProvider {
    type Error = MalError;
    type Client = MalClient;

    const NAME: &'static str = "mal";

    fn client(&self, access_token: &str) -> MalClient {
        MalClient::new(access_token.to_string())
    }

    /// PKCE flow. MAL only supports the `plain` method, so the challenge is
    /// the verifier itself.
    async fn authorize(&self) -> Result<TokenGrant, MalError> {
        let verifier = generate_verifier();
        let auth_url = format!(
            "{AUTH_URL}?response_type=code\
             &client_id={}\
             &code_challenge={verifier}\
             &code_challenge_method=plain\
             &redirect_uri={REDIRECT_URI}",
            self.client_id
        );

        tracing::info!("opening MAL authorization URL in browser");
        oauth::open_browser(&auth_url).map_err(MalError::Auth)?;
        let code = oauth::listen_for_redirect().await.map_err(MalError::Auth)?;

        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("code_verifier", verifier.as_str()),
            ("redirect_uri", REDIRECT_URI),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, MalError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

/// Random 128-character verifier from the RFC 7636 unreserved alphabet.
fn generate_verifier() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut out = String::with_capacity(128);
    while out.len() < 128 {
        let mut h = RandomState::new().build_hasher();
        h.write_usize(out.len());
        for byte in h.finish().to_le_bytes() {
            if out.len() < 128 {
                out.push(CHARS[(byte as usize) % CHARS.len()] as char);
            }
        }
    }
    out
}
