use beatstore_auth::{SigningError, StorageCredentials, UrlSigner, MAX_EXPIRES_SECONDS};
use beatstore_engine::{is_placeholder_key, DownloadUrlPolicy, DEFAULT_DOWNLOAD_EXPIRES_SECONDS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid storage configuration: {0}")]
    Storage(#[from] SigningError),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    #[default]
    Presigned,
    Direct,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
    pub download_mode: DownloadMode,
    pub download_expires_seconds: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: "auto".to_string(),
            bucket: String::new(),
            endpoint: String::new(),
            download_mode: DownloadMode::Presigned,
            download_expires_seconds: DEFAULT_DOWNLOAD_EXPIRES_SECONDS,
        }
    }
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("download_mode", &self.download_mode)
            .field("download_expires_seconds", &self.download_expires_seconds)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub api_base: Option<String>,
}

impl fmt::Debug for PaymentSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentSettings")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub resend_api_key: String,
    pub from: String,
    pub api_base: Option<String>,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("from", &self.from)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub app_url: String,
    pub admin_secret: String,
    pub storage: StorageSettings,
    pub payments: PaymentSettings,
    pub email: EmailSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            database_url: "sqlite:./beatstore.db".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            app_url: "http://localhost:3000".to_string(),
            admin_secret: String::new(),
            storage: StorageSettings::default(),
            payments: PaymentSettings::default(),
            email: EmailSettings::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("app_url", &self.app_url)
            .field("storage", &self.storage)
            .field("payments", &self.payments)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Reads the TOML file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&content)?
            }
            None => ServerConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Overrides fields from `lookup`, which maps variable names to values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, name: &str| {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };

        set(&mut self.database_url, "DATABASE_URL");
        set(&mut self.app_url, "NEXT_PUBLIC_APP_URL");
        set(&mut self.app_url, "APP_URL");
        set(&mut self.admin_secret, "ADMIN_SECRET");
        set(&mut self.storage.access_key_id, "STORAGE_ACCESS_KEY_ID");
        set(&mut self.storage.secret_access_key, "STORAGE_SECRET_ACCESS_KEY");
        set(&mut self.storage.region, "STORAGE_REGION");
        set(&mut self.storage.bucket, "STORAGE_BUCKET");
        set(&mut self.storage.endpoint, "STORAGE_ENDPOINT");
        set(&mut self.payments.stripe_secret_key, "STRIPE_SECRET_KEY");
        set(&mut self.payments.stripe_webhook_secret, "STRIPE_WEBHOOK_SECRET");
        set(&mut self.email.resend_api_key, "RESEND_API_KEY");
        set(&mut self.email.from, "EMAIL_FROM");

        match lookup("STORAGE_DOWNLOAD_MODE").as_deref() {
            Some("direct") => self.storage.download_mode = DownloadMode::Direct,
            Some("presigned") => self.storage.download_mode = DownloadMode::Presigned,
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("database_url"));
        }
        if self.admin_secret.trim().is_empty() {
            return Err(ConfigError::Missing("admin_secret"));
        }
        if !(self.app_url.starts_with("http://") || self.app_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "app_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        let expires = self.storage.download_expires_seconds;
        if expires == 0 || expires > MAX_EXPIRES_SECONDS {
            return Err(ConfigError::Invalid {
                field: "storage.download_expires_seconds",
                reason: format!("must be between 1 and {}", MAX_EXPIRES_SECONDS),
            });
        }
        self.build_signer()?;
        Ok(())
    }

    pub fn build_signer(&self) -> Result<UrlSigner, ConfigError> {
        Ok(UrlSigner::new(StorageCredentials {
            access_key_id: self.storage.access_key_id.clone(),
            secret_access_key: self.storage.secret_access_key.clone(),
            region: self.storage.region.clone(),
            bucket: self.storage.bucket.clone(),
            endpoint: self.storage.endpoint.clone(),
        })?)
    }

    pub fn download_policy(&self) -> DownloadUrlPolicy {
        match self.storage.download_mode {
            DownloadMode::Presigned => DownloadUrlPolicy::Presigned {
                expires_seconds: self.storage.download_expires_seconds,
            },
            DownloadMode::Direct => DownloadUrlPolicy::Direct,
        }
    }

    pub fn payments_configured(&self) -> bool {
        !is_placeholder_key(&self.payments.stripe_secret_key)
    }

    pub fn webhooks_configured(&self) -> bool {
        !is_placeholder_key(&self.payments.stripe_webhook_secret)
    }

    pub fn email_configured(&self) -> bool {
        !self.email.resend_api_key.trim().is_empty() && !self.email.from.trim().is_empty()
    }
}
