use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
}

/// Which storage backend serves the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    Azure,
    Minio,
    Memory,
}

impl StorageKind {
    /// Unknown selectors fall back to MinIO.
    fn from_env_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "azure" => Self::Azure,
            "memory" => Self::Memory,
            "minio" => Self::Minio,
            other => {
                tracing::warn!(value = other, "unknown STORAGE_TYPE, using minio");
                Self::Minio
            }
        }
    }
}

/// Per-backend connection parameters.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Azure(AzureConfig),
    Minio(MinioConfig),
    Memory { container: String },
}

impl BackendConfig {
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Azure(_) => StorageKind::Azure,
            Self::Minio(_) => StorageKind::Minio,
            Self::Memory { .. } => StorageKind::Memory,
        }
    }

    pub fn container(&self) -> &str {
        match self {
            Self::Azure(cfg) => &cfg.container,
            Self::Minio(cfg) => &cfg.bucket,
            Self::Memory { container } => container,
        }
    }
}

#[derive(Clone)]
pub struct AzureConfig {
    pub container: String,
    pub connection_string: Option<String>,
    pub account_name: Option<String>,
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("container", &self.container)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("account_name", &self.account_name)
            .finish()
    }
}

#[derive(Clone)]
pub struct MinioConfig {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub secure: bool,
    pub region: String,
}

impl Default for MinioConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_CONTAINER.into(),
            endpoint: "localhost:9000".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            secure: false,
            region: "us-east-1".into(),
        }
    }
}

impl fmt::Debug for MinioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioConfig")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("secure", &self.secure)
            .field("region", &self.region)
            .finish()
    }
}

const DEFAULT_CONTAINER: &str = "qrcodes";
const DEFAULT_PORT: u16 = 8000;

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "QR code generation and storage API")]
pub struct Args {
    /// Host to bind to (overrides QR_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides QR_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides STORAGE_TYPE)
    #[arg(long, value_enum)]
    pub storage_type: Option<StorageKind>,

    /// Container or bucket holding the codes (overrides CONTAINER_NAME)
    #[arg(long)]
    pub container_name: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_lookup(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values produced by `lookup`.
    pub fn from_lookup<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Environment fallback ---
        let env_host = lookup("QR_STORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("QR_STORE_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing QR_STORE_PORT value `{}`", value))?,
            None => DEFAULT_PORT,
        };
        let env_kind = lookup("STORAGE_TYPE")
            .map(|value| StorageKind::from_env_value(&value))
            .unwrap_or(StorageKind::Minio);
        let env_container = lookup("CONTAINER_NAME").unwrap_or_else(|| DEFAULT_CONTAINER.into());

        // --- Merge ---
        let container = args.container_name.unwrap_or(env_container);
        let backend = match args.storage_type.unwrap_or(env_kind) {
            StorageKind::Azure => {
                let connection_string = lookup("AZURE_STORAGE_CONNECTION_STRING");
                let account_name = lookup("AZURE_STORAGE_ACCOUNT_NAME");
                if connection_string.is_none() && account_name.is_none() {
                    bail!(
                        "azure storage selected but neither AZURE_STORAGE_CONNECTION_STRING \
                         nor AZURE_STORAGE_ACCOUNT_NAME is set"
                    );
                }
                BackendConfig::Azure(AzureConfig {
                    container,
                    connection_string,
                    account_name,
                })
            }
            StorageKind::Minio => {
                let defaults = MinioConfig::default();
                BackendConfig::Minio(MinioConfig {
                    bucket: container,
                    endpoint: lookup("MINIO_ENDPOINT").unwrap_or(defaults.endpoint),
                    access_key: lookup("MINIO_ACCESS_KEY").unwrap_or(defaults.access_key),
                    secret_key: lookup("MINIO_SECRET_KEY").unwrap_or(defaults.secret_key),
                    secure: lookup("MINIO_SECURE")
                        .map(|value| value.eq_ignore_ascii_case("true"))
                        .unwrap_or(defaults.secure),
                    region: lookup("MINIO_REGION").unwrap_or(defaults.region),
                })
            }
            StorageKind::Memory => BackendConfig::Memory { container },
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
