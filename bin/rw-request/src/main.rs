//! Rentwise request tool
//!
//! Sends one authenticated request to the Rentwise API, refreshing the stored
//! token when needed, and manages the stored token slot.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing::{info, warn};

use rw_client::{
    ApiClient, ApiRequest, AuthExpiredReason, ClientConfig, CredentialStore, DispatchError,
    FileCredentialStore, MemoryCredentialStore, MultipartPart, Payload, RefreshPolicy,
    SessionListener, Token, TokenExpiry,
};
use rw_config::{AppConfig, ConfigLoader};

/// Exit code for an ended session
const EXIT_SESSION_EXPIRED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "rw-request", version, about = "Send authenticated requests to the Rentwise API")]
struct Args {
    /// Configuration file (otherwise RENTWISE_CONFIG or the default search paths)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request, e.g. `send GET /api/properties`
    Send {
        /// HTTP method
        method: String,

        /// Path relative to the API base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long, conflicts_with_all = ["data", "form", "file"])]
        json: Option<String>,

        /// Plain-text request body
        #[arg(long, conflicts_with_all = ["form", "file"])]
        data: Option<String>,

        /// Multipart text field, name=value
        #[arg(long)]
        form: Vec<String>,

        /// Multipart file field, name=path
        #[arg(long)]
        file: Vec<String>,

        /// Extra header, 'Name: value'
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Inspect or change the stored token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Print the stored token
    Show,
    /// Print the stored token's expiry
    Status,
    /// Store a token, e.g. one obtained at login
    Set { token: String },
    /// Remove the stored token
    Clear,
}

/// Points the user back at the login surface when the session ends
struct LoginPrompt {
    login_url: String,
}

impl SessionListener for LoginPrompt {
    fn on_session_expired(&self, reason: &AuthExpiredReason) {
        warn!(%reason, "Session ended");
        eprintln!("Session expired, please log in again: {}", self.login_url);
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    rw_common::logging::init_logging("rw-request");

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigLoader::with_path(path).load()?,
        None => AppConfig::load()?,
    };
    info!(base_url = %config.api.base_url, store = %config.credentials.store, "Configuration loaded");

    let store = build_store(&config);

    match args.command {
        Command::Send {
            method,
            path,
            json,
            data,
            form,
            file,
            headers,
        } => {
            let client_config = client_config(&config)?;
            let login_url = client_config.resolve_url(&client_config.login_url);
            let client = ApiClient::builder(client_config, store)
                .listener(Arc::new(LoginPrompt { login_url }))
                .build()?;

            let request = build_request(&method, &path, json, data, &form, &file, &headers).await?;
            send(&client, request).await
        }
        Command::Token { action } => {
            manage_token(store.as_ref(), action).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_store(config: &AppConfig) -> Arc<dyn CredentialStore> {
    match config.credentials.store.as_str() {
        "memory" => {
            warn!("Memory credential store selected; the token lives only for this process");
            Arc::new(MemoryCredentialStore::new())
        }
        _ => Arc::new(FileCredentialStore::new(
            &config.credentials.dir,
            &config.credentials.slot,
        )),
    }
}

fn client_config(config: &AppConfig) -> Result<ClientConfig> {
    let policy = RefreshPolicy::from_str(&config.dispatch.refresh_policy).map_err(|e| anyhow!(e))?;

    Ok(ClientConfig::new(&config.api.base_url)
        .with_refresh_path(&config.api.refresh_path)
        .with_login_url(&config.session.login_url)
        .with_timeouts(
            Duration::from_millis(config.api.timeout_ms),
            Duration::from_millis(config.api.connect_timeout_ms),
        )
        .with_user_agent(&config.api.user_agent)
        .with_refresh_policy(policy)
        .with_expiry_leeway(Duration::from_secs(config.dispatch.expiry_leeway_secs)))
}

async fn build_request(
    method: &str,
    path: &str,
    json: Option<String>,
    data: Option<String>,
    form: &[String],
    files: &[String],
    headers: &[String],
) -> Result<ApiRequest> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method '{}'", method))?;
    let mut request = ApiRequest::new(method, path);

    if let Some(json) = json {
        let value: serde_json::Value = serde_json::from_str(&json).context("--json is not valid JSON")?;
        request = request.payload(Payload::Json(value));
    } else if let Some(data) = data {
        request = request.payload(Payload::Bytes {
            body: bytes::Bytes::from(data),
            content_type: Some("text/plain; charset=utf-8".to_string()),
        });
    } else if !form.is_empty() || !files.is_empty() {
        let mut parts = Vec::with_capacity(form.len() + files.len());
        for field in form {
            let (name, value) = split_pair(field, '=')?;
            parts.push(MultipartPart::text(name, value));
        }
        for field in files {
            let (name, file_path) = split_pair(field, '=')?;
            let file_path = PathBuf::from(file_path);
            let bytes = tokio::fs::read(&file_path)
                .await
                .with_context(|| format!("failed to read {}", file_path.display()))?;
            let file_name = file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            parts.push(MultipartPart::file(name, file_name, bytes, None));
        }
        request = request.multipart(parts);
    }

    for header in headers {
        let (name, value) = split_pair(header, ':')?;
        request = request.header(name, value);
    }

    Ok(request)
}

fn split_pair(raw: &str, separator: char) -> Result<(&str, &str)> {
    match raw.split_once(separator) {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("expected NAME{}VALUE, got '{}'", separator, raw),
    }
}

async fn send(client: &ApiClient, request: ApiRequest) -> Result<ExitCode> {
    match client.request(request).await {
        Ok(response) => {
            eprintln!("HTTP {}", response.status);
            match response.json::<serde_json::Value>() {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) if response.body.is_empty() => {}
                Err(_) => println!("{}", response.text()),
            }
            Ok(ExitCode::SUCCESS)
        }
        // The listener already told the user where to log in
        Err(DispatchError::AuthExpired { .. }) => Ok(ExitCode::from(EXIT_SESSION_EXPIRED)),
        Err(e) => Err(e.into()),
    }
}

async fn manage_token(store: &dyn CredentialStore, action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Show => match store.get().await? {
            Some(token) => println!("{}", token.as_str()),
            None => bail!("no token stored"),
        },
        TokenAction::Status => match store.get().await? {
            Some(token) => match token.expiry() {
                TokenExpiry::Expires(at) if token.is_expired() => println!("expired at {}", at.to_rfc3339()),
                TokenExpiry::Expires(at) => println!("valid until {}", at.to_rfc3339()),
                TokenExpiry::Malformed(e) => println!("unreadable ({}); it will be refreshed before use", e),
            },
            None => println!("no token stored"),
        },
        TokenAction::Set { token } => {
            let token = Token::new(token.trim());
            if let TokenExpiry::Malformed(e) = token.expiry() {
                warn!(error = %e, "Stored token has no readable expiry and will be refreshed before use");
            }
            store.set(&token).await?;
            println!("token stored");
        }
        TokenAction::Clear => {
            store.clear().await?;
            println!("token cleared");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("X-Trace: abc", ':').unwrap(), ("X-Trace", "abc"));
        assert_eq!(split_pair("unit=4B", '=').unwrap(), ("unit", "4B"));
        assert_eq!(split_pair("note=a=b", '=').unwrap(), ("note", "a=b"));
        assert!(split_pair("novalue", '=').is_err());
        assert!(split_pair("=value", '=').is_err());
    }

    #[test]
    fn test_client_config_from_app_config() {
        let mut config = AppConfig::default();
        config.api.base_url = "https://api.rentwise.test".to_string();
        config.dispatch.refresh_policy = "independent".to_string();
        config.dispatch.expiry_leeway_secs = 15;

        let client_config = client_config(&config).unwrap();

        assert_eq!(client_config.refresh_url(), "https://api.rentwise.test/api/auth/refresh");
        assert_eq!(client_config.refresh_policy, RefreshPolicy::Independent);
        assert_eq!(client_config.expiry_leeway, Duration::from_secs(15));
        assert_eq!(client_config.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_build_request_variants() {
        let request = build_request("post", "/api/messages", Some(r#"{"body":"hi"}"#.into()), None, &[], &[], &[])
            .await
            .unwrap();
        assert_eq!(request.method(), &Method::POST);
        assert!(matches!(request.payload_ref(), Payload::Json(_)));

        let request = build_request(
            "POST",
            "/api/documents",
            None,
            None,
            &["category=lease".to_string()],
            &[],
            &["X-Trace: t1".to_string()],
        )
        .await
        .unwrap();
        assert!(request.payload_ref().is_multipart());

        let bad = build_request("GET", "/", Some("{oops".into()), None, &[], &[], &[]).await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_manage_token_round_trip() {
        let store = MemoryCredentialStore::new();

        manage_token(&store, TokenAction::Set { token: " abc.def.ghi \n".into() }).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(Token::new("abc.def.ghi")));

        manage_token(&store, TokenAction::Clear).await.unwrap();
        assert!(store.get().await.unwrap().is_none());
        assert!(manage_token(&store, TokenAction::Show).await.is_err());
    }
}
