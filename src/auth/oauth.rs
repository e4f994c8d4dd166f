use anyhow::{Result, anyhow};
use log::{info, warn};
use oauth2::TokenResponse;
use oauth2::basic::BasicClient;
use oauth2::reqwest::http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, Scope, TokenUrl,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};
use url::Url;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALLBACK_WAIT: Duration = Duration::from_secs(120);

/// Tokens returned by a grant (in-memory only).
#[derive(Debug)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

pub struct GoogleOAuth {
    client: BasicClient,
}

impl GoogleOAuth {
    pub fn new(client_id: &str, client_secret: Option<&str>) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            client_secret.map(|s| ClientSecret::new(s.to_string())),
            AuthUrl::new(GOOGLE_AUTH_URL.to_string())?,
            Some(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?),
        );
        Ok(Self { client })
    }

    pub fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let token = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request(http_client)
            .map_err(|e| anyhow!("token refresh failed: {e}"))?;

        Ok(Tokens {
            access_token: token.access_token().secret().to_string(),
            // Google usually omits a new refresh token on refresh
            refresh_token: token.refresh_token().map(|r| r.secret().to_string()),
            expires_in: token.expires_in().map(|d| d.as_secs()),
        })
    }

    /// Authorization Code + PKCE through a loopback redirect. Opens the system
    /// browser and waits for the callback on the redirect address.
    pub fn authorize_interactive(&self, redirect_uri: &str, scopes: &[&str]) -> Result<Tokens> {
        let redirect = Url::parse(redirect_uri)
            .map_err(|e| anyhow!("Invalid redirect_uri '{redirect_uri}': {e}"))?;
        let bind_addr = callback_bind_addr(&redirect)?;

        // listen before the browser can possibly redirect
        let server = Server::http(bind_addr)
            .map_err(|e| anyhow!("Failed to bind OAuth callback server on {bind_addr}: {e:?}"))?;

        let client = self
            .client
            .clone()
            .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        println!("Open this URL in your browser:\n{auth_url}");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("could not open browser automatically: {e}");
        }

        let code = wait_for_code(&server, &redirect, csrf.secret())?;
        info!("authorization code received, exchanging for tokens");

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request(http_client)
            .map_err(|e| anyhow!("Token exchange failed: {e}"))?;

        Ok(Tokens {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|r| r.secret().to_string()),
            expires_in: token.expires_in().map(|d| d.as_secs()),
        })
    }
}

fn wait_for_code(server: &Server, redirect: &Url, state: &str) -> Result<String> {
    let wait_until = Instant::now() + CALLBACK_WAIT;

    while Instant::now() < wait_until {
        let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };

        match extract_code(redirect, request.url(), state) {
            Some(code) => {
                let _ = request.respond(Response::from_string(
                    "Authorization received. You can close this tab.",
                ));
                return Ok(code);
            }
            None => {
                let _ = request.respond(Response::from_string(
                    "No valid code found in redirect. You can close this tab.",
                ));
            }
        }
    }

    Err(anyhow!("No code received within timeout"))
}

/// Loopback address the callback server must bind for `redirect`.
pub fn callback_bind_addr(redirect: &Url) -> Result<SocketAddr> {
    let host = redirect
        .host_str()
        .ok_or_else(|| anyhow!("redirect_uri missing host: {redirect}"))?;
    let port = redirect
        .port_or_known_default()
        .ok_or_else(|| anyhow!("redirect_uri missing/unknown port: {redirect}"))?;

    let ip: IpAddr = match host {
        "localhost" | "127.0.0.1" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other.parse::<IpAddr>().map_err(|_| {
            anyhow!("redirect_uri host must be localhost/127.0.0.1 or an IP: {other}")
        })?,
    };
    Ok(SocketAddr::new(ip, port))
}

/// Pull the `code` query parameter out of a callback request path. Requests
/// whose `state` differs from the one sent with the authorization URL are
/// ignored.
pub fn extract_code(redirect: &Url, request_path: &str, state: &str) -> Option<String> {
    let full = redirect.join(request_path).ok()?;
    let param = |name: &str| {
        full.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if param("state").as_deref() != Some(state) {
        warn!("ignoring OAuth callback with missing or mismatched state");
        return None;
    }
    param("code")
}
