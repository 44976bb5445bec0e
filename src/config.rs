//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;

use crate::auth::{Authenticator, Credentials, DEFAULT_TOKEN_TTL, DEFAULT_TOKEN_URL, ServiceAccount};
use crate::error::{ProxyError, Result};
use crate::google::{DEFAULT_SHEETS_URL, GoogleSheets};
use crate::schema::SchemaRegistry;

#[derive(Parser, Debug, Clone)]
#[command(name = "sheetdesk")]
#[command(
    version,
    about = "Spreadsheet tab proxy for construction project dashboards",
    long_about = None
)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "SHEETDESK_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Spreadsheet identifier
    #[arg(long, env = "GOOGLE_SHEET_ID")]
    pub sheet_id: Option<String>,

    /// Service account email used as the assertion issuer
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_EMAIL")]
    pub service_account_email: Option<String>,

    /// PEM private key of the service account (escaped newlines allowed)
    #[arg(
        long,
        env = "GOOGLE_PRIVATE_KEY",
        hide_env_values = true,
        allow_hyphen_values = true
    )]
    pub private_key: Option<String>,

    /// API key for read-only access
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// TOML file with per-tab schemas
    #[arg(long, env = "SHEETDESK_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Lifetime of signed assertions, in seconds
    #[arg(long, env = "SHEETDESK_TOKEN_TTL", default_value_t = DEFAULT_TOKEN_TTL)]
    pub token_ttl: u64,

    /// Timeout for outbound requests, in seconds
    #[arg(long, env = "SHEETDESK_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, default_value = DEFAULT_SHEETS_URL)]
    pub sheets_url: String,

    #[arg(long, default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Serve tabs from a JSON seed file instead of Google Sheets
    #[arg(long, value_name = "SEED_JSON")]
    pub demo: Option<PathBuf>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Pick credentials: a service account when both email and key are
    /// set, otherwise an API key
    ///
    /// # Errors
    /// * `Config` if neither is configured
    /// * `InvalidKey` if the private key does not parse
    pub fn credentials(&self) -> Result<Credentials> {
        if let (Some(email), Some(key)) = (
            present(&self.service_account_email),
            present(&self.private_key),
        ) {
            return Ok(Credentials::ServiceAccount(ServiceAccount::from_pem(email, key)?));
        }
        if let Some(key) = present(&self.api_key) {
            log::warn!("Using API-key credentials; writes will be rejected");
            return Ok(Credentials::ApiKey(key.to_string()));
        }
        Err(ProxyError::Config(
            "Set GOOGLE_SERVICE_ACCOUNT_EMAIL and GOOGLE_PRIVATE_KEY, or GOOGLE_API_KEY".to_string(),
        ))
    }

    pub fn sheet_id(&self) -> Result<&str> {
        present(&self.sheet_id)
            .ok_or_else(|| ProxyError::Config("GOOGLE_SHEET_ID is not set".to_string()))
    }

    /// Schema registry from `--schema`, or an empty one
    pub fn schemas(&self) -> Result<SchemaRegistry> {
        match &self.schema {
            Some(path) => {
                let registry = SchemaRegistry::load(path)?;
                log::info!("Loaded {} tab schema(s) from {}", registry.len(), path.display());
                Ok(registry)
            }
            None => Ok(SchemaRegistry::empty()),
        }
    }

    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(builder.build()?)
    }

    /// Google Sheets backend built from the configured credentials
    pub fn google_sheets(&self) -> Result<GoogleSheets> {
        let sheet_id = self.sheet_id()?;
        let http = self.http_client()?;
        let auth = Authenticator::new(http.clone(), self.credentials()?)
            .with_token_url(&self.token_url)
            .with_ttl(self.token_ttl);
        Ok(GoogleSheets::new(http, auth, sheet_id).with_base_url(&self.sheets_url))
    }
}
