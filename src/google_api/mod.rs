//! Google Calendar access: token handling + direct HTTP via reqwest.
//!
//! The OAuth consent flow is out of scope — a token.json obtained by an
//! external tool is expected on disk, and only access-token refresh is
//! handled here. The token format matches what google-auth libraries
//! write, so both `token` and `access_token` are accepted on read.
//!
//! Modules:
//! - calendar: Google Calendar API v3 (list + create)

pub mod calendar;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// OAuth2 scope required for calendar read + event creation.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted at ~/.slotwise/google/token.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    /// The access token (some writers use "access_token")
    #[serde(alias = "access_token")]
    pub token: String,
    /// The refresh token (long-lived, used to get new access tokens)
    pub refresh_token: Option<String>,
    /// Token endpoint URL
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret (optional for PKCE clients)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorized scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (ISO 8601)
    #[serde(default)]
    pub expiry: Option<String>,
    /// Authenticated user email
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Token I/O
// ============================================================================

/// Path to the Google token file.
pub fn token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".slotwise")
        .join("google")
        .join("token.json")
}

/// Load the Google OAuth token from disk.
pub fn load_token() -> Result<GoogleToken, GoogleApiError> {
    let path = token_path();
    if !path.exists() {
        return Err(GoogleApiError::TokenNotFound(path));
    }
    let content = std::fs::read_to_string(&path)?;
    let token: GoogleToken = serde_json::from_str(&content)?;
    Ok(token)
}

/// Persist the Google OAuth token, restricting permissions.
pub fn save_token(token: &GoogleToken) -> Result<(), GoogleApiError> {
    let path = token_path();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(token)?;
    crate::util::atomic_write_str(&path, &content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

// ============================================================================
// Token refresh
// ============================================================================

/// Global mutex to serialize concurrent token refreshes.
static TOKEN_REFRESH_MUTEX: std::sync::OnceLock<Mutex<()>> = std::sync::OnceLock::new();

fn refresh_mutex() -> &'static Mutex<()> {
    TOKEN_REFRESH_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Check if a token is expired based on its expiry field.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true, // No expiry = assume expired, try refresh
        Some(expiry_str) => {
            match chrono::DateTime::parse_from_rfc3339(&expiry_str.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry_str))
            {
                Ok(expiry) => {
                    // Consider expired if within 60 seconds of expiry
                    let now = chrono::Utc::now();
                    expiry <= now + chrono::Duration::seconds(60)
                }
                Err(_) => true, // Can't parse = assume expired
            }
        }
    }
}

/// Refresh an access token using the refresh token.
///
/// Returns an updated GoogleToken with new access token and expiry.
/// Serializes concurrent refreshes via a tokio Mutex.
pub async fn refresh_access_token(token: &GoogleToken) -> Result<GoogleToken, GoogleApiError> {
    let _guard = refresh_mutex().lock().await;

    let refresh_token = token
        .refresh_token
        .as_ref()
        .ok_or(GoogleApiError::AuthExpired)?;

    let client = reqwest::Client::new();

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = client.post(&token.token_uri).form(&form).send().await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;

    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut new_token = token.clone();
    new_token.token = access_token.to_string();
    new_token.expiry = Some(expiry.to_rfc3339());

    // Persist the refreshed token
    save_token(&new_token)?;

    Ok(new_token)
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

/// Get a valid access token, refreshing if expired.
///
/// This is the main entry point for all Calendar API calls.
pub async fn get_valid_access_token() -> Result<String, GoogleApiError> {
    let token = load_token()?;

    if is_token_expired(&token) {
        let refreshed = refresh_access_token(&token).await?;
        Ok(refreshed.token)
    } else {
        Ok(token.token)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_expiry(expiry: Option<String>) -> GoogleToken {
        GoogleToken {
            token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: default_token_uri(),
            client_id: "c".to_string(),
            client_secret: None,
            scopes: vec![],
            expiry,
            account: None,
        }
    }

    #[test]
    fn test_google_token_roundtrip() {
        let token = GoogleToken {
            token: "ya29.test-access-token".to_string(),
            refresh_token: Some("1//test-refresh-token".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "12345.apps.googleusercontent.com".to_string(),
            client_secret: Some("test-secret".to_string()),
            scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
            expiry: Some("2026-08-07T12:00:00Z".to_string()),
            account: Some("user@example.com".to_string()),
        };

        let json = serde_json::to_string_pretty(&token).unwrap();
        let parsed: GoogleToken = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.token, "ya29.test-access-token");
        assert_eq!(
            parsed.refresh_token.as_deref(),
            Some("1//test-refresh-token")
        );
        assert_eq!(parsed.account.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_google_token_access_token_alias() {
        // Some writers use "access_token" instead of "token"
        let json = r#"{
            "access_token": "ya29.alias-token",
            "refresh_token": "1//refresh",
            "client_id": "client"
        }"#;

        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "ya29.alias-token");
        assert!(token.client_secret.is_none());
    }

    #[test]
    fn test_is_token_expired_no_expiry() {
        assert!(is_token_expired(&token_with_expiry(None)));
    }

    #[test]
    fn test_is_token_expired_future() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!is_token_expired(&token_with_expiry(Some(
            future.to_rfc3339()
        ))));
    }

    #[test]
    fn test_is_token_expired_past() {
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(is_token_expired(&token_with_expiry(Some(
            past.to_rfc3339()
        ))));
    }

    #[test]
    fn test_is_token_expired_microseconds_format() {
        // google-auth writes fractional seconds with a Z suffix
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        let formatted = future.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();
        assert!(!is_token_expired(&token_with_expiry(Some(formatted))));
    }

    #[test]
    fn test_map_refresh_error_invalid_grant() {
        let err = map_refresh_error(400, r#"{"error": "invalid_grant"}"#);
        assert!(matches!(err, GoogleApiError::AuthExpired));
    }

    #[test]
    fn test_map_refresh_error_other() {
        let err = map_refresh_error(500, "internal");
        assert!(matches!(err, GoogleApiError::RefreshFailed(_)));
    }
}
