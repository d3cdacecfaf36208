//! Azure Blob Storage backend.
//!
//! Credentials are resolved in priority order:
//! 1. `AZURE_STORAGE_CONNECTION_STRING` (account key, SAS, custom endpoint or
//!    the local emulator via `UseDevelopmentStorage=true`)
//! 2. ambient managed identity for `AZURE_STORAGE_ACCOUNT_NAME`

use async_trait::async_trait;
use azure_core::StatusCode;
use azure_storage::{CloudLocation, ConnectionString, StorageCredentials};
use azure_storage_blobs::prelude::{ClientBuilder, ContainerClient};
use futures::{StreamExt, stream};
use tracing::{debug, info};

use super::{
    ByteStream, DEFAULT_CONTENT_TYPE, DOWNLOAD_CHUNK_SIZE, StorageError, StorageProvider,
    StorageResult, UploadSource,
};
use crate::config::AzureConfig;

const EMULATOR_ADDRESS: &str = "127.0.0.1";
const EMULATOR_PORT: u16 = 10000;
const EMULATOR_ACCOUNT: &str = "devstoreaccount1";

pub struct AzureBlobProvider {
    container: ContainerClient,
    container_name: String,
    base_url: String,
}

impl AzureBlobProvider {
    pub fn new(config: &AzureConfig) -> StorageResult<Self> {
        let endpoint = resolve_endpoint(config)?;
        let credentials = resolve_credentials(config)?;
        let base_url = endpoint.base_url();

        debug!(base_url = %base_url, container = %config.container, "building blob client");
        let container = ClientBuilder::with_location(endpoint.into_location(), credentials)
            .container_client(config.container.clone());

        Ok(Self {
            container,
            container_name: config.container.clone(),
            base_url,
        })
    }
}

#[async_trait]
impl StorageProvider for AzureBlobProvider {
    async fn initialize(&self) -> StorageResult<()> {
        match self.container.create().await {
            Ok(_) => info!(container = %self.container_name, "created container"),
            Err(err) if status_of(&err) == Some(StatusCode::Conflict) => {
                debug!(container = %self.container_name, "container already exists");
            }
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "creating container `{}` at {}: {}",
                    self.container_name, self.base_url, err
                )));
            }
        }
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        source: UploadSource,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let (data, len) = source.into_sized_bytes().await?;
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string();

        debug!(container = %self.container_name, key, len, "uploading block blob");
        self.container
            .blob_client(key)
            .put_block_blob(data)
            .content_type(content_type)
            .await
            .map_err(|err| map_azure_error(key, err))?;

        Ok(self.resolve_url(key))
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        debug!(container = %self.container_name, key, "downloading blob");
        let mut pages = self
            .container
            .blob_client(key)
            .get()
            .chunk_size(DOWNLOAD_CHUNK_SIZE as u64)
            .into_stream();

        // The first page tells a missing blob apart from an empty one.
        let first = match pages.next().await {
            Some(page) => page.map_err(|err| map_azure_error(key, err))?,
            None => return Ok(stream::empty().boxed()),
        };

        let owned_key = key.to_string();
        let rest_key = owned_key.clone();
        let chunks = stream::once(async move { Ok(first) })
            .chain(pages.map(move |page| page.map_err(|err| map_azure_error(&rest_key, err))))
            .then(move |page| {
                let key = owned_key.clone();
                async move {
                    page?
                        .data
                        .collect()
                        .await
                        .map_err(|err| map_azure_error(&key, err))
                }
            });

        Ok(chunks.boxed())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.container.blob_client(key).get_properties().await {
            Ok(_) => Ok(true),
            Err(err) if status_of(&err) == Some(StatusCode::NotFound) => Ok(false),
            Err(err) => Err(StorageError::request(key, err)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!(container = %self.container_name, key, "deleting blob");
        self.container
            .blob_client(key)
            .delete()
            .await
            .map_err(|err| map_azure_error(key, err))?;
        Ok(())
    }

    fn resolve_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.container_name, key)
    }
}

/// Where the storage account is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Public { account: String },
    Emulator,
    Custom { account: String, uri: String },
}

impl Endpoint {
    fn base_url(&self) -> String {
        match self {
            Self::Public { account } => format!("https://{}.blob.core.windows.net", account),
            Self::Emulator => format!(
                "http://{}:{}/{}",
                EMULATOR_ADDRESS, EMULATOR_PORT, EMULATOR_ACCOUNT
            ),
            Self::Custom { uri, .. } => uri.clone(),
        }
    }

    fn into_location(self) -> CloudLocation {
        match self {
            Self::Public { account } => CloudLocation::Public { account },
            Self::Emulator => CloudLocation::Emulator {
                address: EMULATOR_ADDRESS.to_string(),
                port: EMULATOR_PORT,
            },
            Self::Custom { account, uri } => CloudLocation::Custom { account, uri },
        }
    }
}

fn parse_connection_string(raw: &str) -> StorageResult<ConnectionString<'_>> {
    ConnectionString::new(raw)
        .map_err(|err| StorageError::Unavailable(format!("invalid connection string: {}", err)))
}

fn resolve_endpoint(config: &AzureConfig) -> StorageResult<Endpoint> {
    if let Some(raw) = config.connection_string.as_deref() {
        let parsed = parse_connection_string(raw)?;
        if parsed.use_development_storage == Some(true) {
            return Ok(Endpoint::Emulator);
        }

        let account = parsed
            .account_name
            .or(config.account_name.as_deref())
            .ok_or_else(|| {
                StorageError::Unavailable("connection string does not name an account".into())
            })?
            .to_string();

        return Ok(match parsed.blob_endpoint {
            Some(uri) => Endpoint::Custom {
                account,
                uri: uri.trim_end_matches('/').to_string(),
            },
            None => Endpoint::Public { account },
        });
    }

    match config.account_name.as_deref() {
        Some(account) if !account.is_empty() => Ok(Endpoint::Public {
            account: account.to_string(),
        }),
        _ => Err(StorageError::Unavailable(
            "neither AZURE_STORAGE_CONNECTION_STRING nor AZURE_STORAGE_ACCOUNT_NAME is set".into(),
        )),
    }
}

fn resolve_credentials(config: &AzureConfig) -> StorageResult<StorageCredentials> {
    if let Some(raw) = config.connection_string.as_deref() {
        let parsed = parse_connection_string(raw)?;
        if parsed.use_development_storage == Some(true) {
            return Ok(StorageCredentials::emulator());
        }
        return parsed.storage_credentials().map_err(|err| {
            StorageError::Unavailable(format!("connection string credentials: {}", err))
        });
    }

    let credential = azure_identity::create_credential().map_err(|err| {
        StorageError::Unavailable(format!("resolving managed identity: {}", err))
    })?;
    Ok(StorageCredentials::token_credential(credential))
}

fn status_of(err: &azure_core::Error) -> Option<StatusCode> {
    err.as_http_error().map(|http| http.status())
}

fn map_azure_error(key: &str, err: azure_core::Error) -> StorageError {
    if status_of(&err) == Some(StatusCode::NotFound) {
        StorageError::not_found(key)
    } else {
        StorageError::request(key, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connection_string: Option<&str>, account_name: Option<&str>) -> AzureConfig {
        AzureConfig {
            container: "qrcodes".into(),
            connection_string: connection_string.map(str::to_string),
            account_name: account_name.map(str::to_string),
        }
    }

    #[test]
    fn connection_string_with_account_key_targets_public_cloud() {
        let cfg = config(
            Some(
                "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.windows.net",
            ),
            None,
        );
        let endpoint = resolve_endpoint(&cfg).unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Public {
                account: "acct".into()
            }
        );
        assert_eq!(endpoint.base_url(), "https://acct.blob.core.windows.net");
    }

    #[test]
    fn blob_endpoint_overrides_public_url() {
        let cfg = config(
            Some("AccountName=acct;AccountKey=a2V5;BlobEndpoint=http://azurite:10000/acct/"),
            None,
        );
        let endpoint = resolve_endpoint(&cfg).unwrap();
        assert_eq!(endpoint.base_url(), "http://azurite:10000/acct");
    }

    #[test]
    fn development_storage_uses_emulator() {
        let cfg = config(Some("UseDevelopmentStorage=true"), None);
        assert_eq!(resolve_endpoint(&cfg).unwrap(), Endpoint::Emulator);
        assert_eq!(
            Endpoint::Emulator.base_url(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }

    #[test]
    fn connection_string_takes_priority_over_account_name() {
        let cfg = config(Some("AccountName=fromconn;AccountKey=a2V5"), Some("fromenv"));
        assert_eq!(
            resolve_endpoint(&cfg).unwrap(),
            Endpoint::Public {
                account: "fromconn".into()
            }
        );
    }

    #[test]
    fn account_name_alone_targets_public_cloud() {
        let cfg = config(None, Some("acct"));
        assert_eq!(
            resolve_endpoint(&cfg).unwrap(),
            Endpoint::Public {
                account: "acct".into()
            }
        );
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = resolve_endpoint(&config(None, None)).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
