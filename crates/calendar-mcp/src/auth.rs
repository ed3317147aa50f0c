//! OAuth2 credentials for the Calendar API: token storage, refresh, login and
//! logout.
//!
//! The [`CredentialStore`] is an explicitly passed handle. It is opened once
//! (loading `token.json` if present), hands out valid access tokens through
//! [`CredentialProvider`], refreshes them when they are about to expire, and
//! is torn down with [`CredentialStore::logout`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use crate::config::AuthConfig;
use crate::error::AuthError;

pub type Result<T> = std::result::Result<T, AuthError>;

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Authorized-user credentials, stored in the same layout Google's client
/// libraries use for `token.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl Credentials {
    /// True if the access token can still be used at `now`.
    ///
    /// A token without an expiry is trusted until the API rejects it.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }
}

/// OAuth client registration from `client_secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Read an "installed" or "web" client secret file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::MissingClientSecret {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(AuthError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file: ClientSecretFile =
            serde_json::from_str(&content).map_err(|e| AuthError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        file.installed.or(file.web).ok_or_else(|| AuthError::Malformed {
            path: path.to_path_buf(),
            message: "expected an \"installed\" or \"web\" client".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn oauth_error_message(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("{}: {}", err.error, desc),
            None => err.error,
        },
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

/// Anything that can hand out a currently valid access token.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    /// `AuthError::NotAuthenticated` when no token is stored,
    /// `AuthError::Expired` when a refresh is needed and fails.
    async fn get_valid_credentials(&self) -> Result<Credentials>;
}

/// Token storage backed by a JSON file, with an in-memory cache.
pub struct CredentialStore {
    token_path: PathBuf,
    revoke_url: String,
    http: reqwest::Client,
    cached: Mutex<Option<Credentials>>,
}

impl CredentialStore {
    /// Open the store, loading the token file if one exists.
    pub async fn open(config: &AuthConfig) -> Result<Self> {
        let cached = load_token_file(&config.token_file).await?;
        if cached.is_some() {
            debug!(path = %config.token_file.display(), "Loaded stored token");
        }
        Ok(Self {
            token_path: config.token_file.clone(),
            revoke_url: config.revoke_url.clone(),
            http: reqwest::Client::new(),
            cached: Mutex::new(cached),
        })
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Snapshot of the stored credentials without refreshing.
    pub async fn current(&self) -> Option<Credentials> {
        self.cached.lock().await.clone()
    }

    /// Persist `creds` to the token file and cache them.
    pub async fn store(&self, creds: Credentials) -> Result<()> {
        let mut cached = self.cached.lock().await;
        write_token_file(&self.token_path, &creds).await?;
        *cached = Some(creds);
        Ok(())
    }

    /// Revoke the stored token and delete the token file.
    ///
    /// Returns `false` if there was nothing to remove. A failed revocation is
    /// logged; the local token is deleted regardless.
    pub async fn logout(&self) -> Result<bool> {
        let mut cached = self.cached.lock().await;
        let creds = match cached.take() {
            Some(creds) => Some(creds),
            None => load_token_file(&self.token_path).await?,
        };
        let Some(creds) = creds else {
            return Ok(false);
        };

        let token = creds
            .refresh_token
            .as_deref()
            .unwrap_or(&creds.access_token);
        match self
            .http
            .post(&self.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => info!("Revoked OAuth token"),
            Ok(resp) => warn!(status = %resp.status(), "Token revocation rejected"),
            Err(e) => warn!(error = %e, "Token revocation failed"),
        }

        match tokio::fs::remove_file(&self.token_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(AuthError::Io {
                    path: self.token_path.clone(),
                    source,
                })
            }
        }
        Ok(true)
    }

    async fn refresh(&self, creds: &Credentials) -> Result<Credentials> {
        let refresh_token = creds
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Expired("no refresh token stored".to_string()))?;

        debug!(token_uri = %creds.token_uri, "Refreshing access token");
        let resp = self
            .http
            .post(&creds.token_uri)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Expired(format!(
                "refresh rejected ({status}): {}",
                oauth_error_message(&body)
            )));
        }

        let token: TokenResponse = resp.json().await?;
        Ok(Credentials {
            access_token: token.access_token,
            // Google omits the refresh token on refresh; keep the old one.
            refresh_token: token.refresh_token.or_else(|| creds.refresh_token.clone()),
            token_uri: creds.token_uri.clone(),
            client_id: creds.client_id.clone(),
            client_secret: creds.client_secret.clone(),
            scopes: token
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| creds.scopes.clone()),
            expiry: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn get_valid_credentials(&self) -> Result<Credentials> {
        let mut cached = self.cached.lock().await;
        let creds = cached
            .as_ref()
            .ok_or_else(|| AuthError::NotAuthenticated {
                path: self.token_path.clone(),
            })?;

        if creds.is_valid_at(Utc::now()) {
            return Ok(creds.clone());
        }

        let refreshed = self.refresh(creds).await?;
        write_token_file(&self.token_path, &refreshed).await?;
        info!("Access token refreshed");
        *cached = Some(refreshed.clone());
        Ok(refreshed)
    }
}

/// Forwards the consent URL to the caller; the code arrives on the loopback
/// redirect, so nothing is read back from the user.
struct ConsentPrompt<F>(F);

impl<F> InstalledFlowDelegate for ConsentPrompt<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        (self.0)(url);
        Box::pin(async { Ok(String::new()) })
    }
}

/// Token sink handed to the authenticator. It never reports a cached token,
/// so every login goes through consent, and it keeps what the flow issues
/// for [`CredentialStore::store`].
#[derive(Clone, Default)]
struct IssuedToken(Arc<Mutex<Option<TokenInfo>>>);

#[async_trait]
impl TokenStorage for IssuedToken {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> std::result::Result<(), yup_oauth2::storage::TokenStorageError> {
        *self.0.lock().await = Some(token);
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        None
    }
}

impl From<&ClientSecret> for ApplicationSecret {
    fn from(secret: &ClientSecret) -> Self {
        ApplicationSecret {
            client_id: secret.client_id.clone(),
            client_secret: secret.client_secret.clone(),
            auth_uri: secret.auth_uri.clone(),
            token_uri: secret.token_uri.clone(),
            ..ApplicationSecret::default()
        }
    }
}

/// Run the installed-app OAuth flow with a loopback redirect and store the
/// resulting token.
///
/// `on_url` receives the consent URL to show the user. The wait for the
/// browser redirect is bounded by `config.login_timeout_secs`.
pub async fn login<F>(config: &AuthConfig, store: &CredentialStore, on_url: F) -> Result<Credentials>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    let secret = ClientSecret::from_file(&config.credentials_file).await?;

    // reqwest and hyper-rustls may enable different rustls backends.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let issued = IssuedToken::default();
    let authenticator = InstalledFlowAuthenticator::builder(
        ApplicationSecret::from(&secret),
        InstalledFlowReturnMethod::HTTPRedirect,
    )
    .flow_delegate(Box::new(ConsentPrompt(on_url)))
    .with_storage(Box::new(issued.clone()))
    .build()
    .await
    .map_err(|e| AuthError::Flow(format!("cannot start loopback redirect: {e}")))?;

    let limit = std::time::Duration::from_secs(config.login_timeout_secs);
    within_deadline(limit, authenticator.token(&config.scopes))
        .await?
        .map_err(|e| AuthError::Flow(e.to_string()))?;
    debug!("Authorization code exchanged");

    let token = issued
        .0
        .lock()
        .await
        .take()
        .ok_or_else(|| AuthError::Flow("authorization server issued no token".to_string()))?;
    let creds = credentials_from_issued(token, secret, &config.scopes)?;
    store.store(creds.clone()).await?;
    info!(path = %store.token_path.display(), "Token saved");
    Ok(creds)
}

fn credentials_from_issued(
    token: TokenInfo,
    secret: ClientSecret,
    scopes: &[String],
) -> Result<Credentials> {
    let access_token = token
        .access_token
        .ok_or_else(|| AuthError::Flow("token response had no access_token".to_string()))?;
    Ok(Credentials {
        access_token,
        refresh_token: token.refresh_token,
        token_uri: secret.token_uri,
        client_id: secret.client_id,
        client_secret: secret.client_secret,
        scopes: scopes.to_vec(),
        expiry: token
            .expires_at
            .and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), 0)),
    })
}

/// Fail with `AuthError::Flow` if `fut` has not finished within `limit`.
async fn within_deadline<T>(limit: std::time::Duration, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        AuthError::Flow(format!(
            "no authorization received within {}s",
            limit.as_secs()
        ))
    })
}

async fn load_token_file(path: &Path) -> Result<Option<Credentials>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AuthError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| AuthError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

async fn write_token_file(path: &Path, creds: &Credentials) -> Result<()> {
    let io_err = |source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(creds).map_err(|e| AuthError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tokio::fs::write(path, json).await.map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }
    Ok(())
}
