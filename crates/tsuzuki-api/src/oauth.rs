//! Loopback redirect handling shared by the OAuth flows.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

pub const REDIRECT_PORT: u16 = 19742;
pub const REDIRECT_URI: &str = "http://localhost:19742";

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                            <html><body><h2>Authorization successful!</h2>\
                            <p>You can close this tab and return to tsuzuki.</p></body></html>";

/// Open the consent page in the user's browser.
pub fn open_browser(auth_url: &str) -> Result<(), String> {
    open::that(auth_url).map_err(|e| format!("failed to open browser: {e}"))
}

/// Wait for one OAuth redirect on the loopback port and return its `code` parameter.
pub async fn listen_for_redirect() -> Result<String, String> {
    let listener = TcpListener::bind(("127.0.0.1", REDIRECT_PORT))
        .await
        .map_err(|e| format!("failed to bind localhost:{REDIRECT_PORT}: {e}"))?;

    tracing::info!(port = REDIRECT_PORT, "waiting for OAuth redirect");

    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| format!("failed to accept connection: {e}"))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| format!("failed to read from stream: {e}"))?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let code = extract_code(&request)?;
    let _ = stream.write_all(SUCCESS_PAGE.as_bytes()).await;
    Ok(code)
}

/// Pull the `code` query parameter out of a raw HTTP request line:
/// `GET /?code=...&state=... HTTP/1.1`.
fn extract_code(request: &str) -> Result<String, String> {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| "malformed HTTP request from redirect".to_string())?;

    let parsed = Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| format!("failed to parse redirect URL: {e}"))?;

    if let Some((_, err)) = parsed.query_pairs().find(|(k, _)| k == "error") {
        return Err(format!("authorization denied: {err}"));
    }

    parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| "no 'code' parameter in redirect".to_string())
}
