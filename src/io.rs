//! I/O managers for different storage backends

use crate::error::{Result, VdsError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local file system
    FileSystem,
    /// Process memory
    InMemory,
    /// AWS S3
    S3,
    /// Azure Blob Storage
    Azure,
    /// Google Cloud Storage
    GCS,
    /// Plain HTTP(S) object URLs
    Http,
}

impl StorageBackend {
    /// Parse storage backend from URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end];
            match scheme {
                "file" => Ok(StorageBackend::FileSystem),
                "inmemory" => Ok(StorageBackend::InMemory),
                "s3" => Ok(StorageBackend::S3),
                "azure" | "azureSAS" => Ok(StorageBackend::Azure),
                "gs" => Ok(StorageBackend::GCS),
                "http" | "https" => Ok(StorageBackend::Http),
                _ => Err(VdsError::InvalidUrl(format!("Unknown scheme: {}", scheme))),
            }
        } else {
            // Assume file system if no scheme
            Ok(StorageBackend::FileSystem)
        }
    }
}

/// Connection configuration of a volume
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOptions {
    LocalFile {
        path: PathBuf,
    },
    InMemory,
    S3 {
        bucket: String,
        key: String,
        region: String,
        endpoint_override: Option<String>,
    },
    Azure {
        connection_string: String,
        container: String,
        blob: String,
        parallelism: usize,
        max_execution_time: Duration,
    },
    AzurePresigned {
        base_url: String,
        url_suffix: String,
    },
    GoogleStorage {
        bucket: String,
        path_prefix: String,
    },
    GenericUrl {
        url: String,
        connection_string: String,
    },
}

impl OpenOptions {
    pub fn local_file(path: impl AsRef<Path>) -> Self {
        OpenOptions::LocalFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Build options from a URL and an optional connection string
    pub fn from_url(url: &str, connection_string: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(VdsError::InvalidArgument("Empty URL".to_string()));
        }
        let backend = StorageBackend::from_url(url)?;
        let rest = url.find("://").map(|i| &url[i + 3..]).unwrap_or(url);
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket.to_string(), key.to_string()),
            None => (rest.to_string(), String::new()),
        };
        let options = match backend {
            StorageBackend::FileSystem => OpenOptions::local_file(rest),
            StorageBackend::InMemory => OpenOptions::InMemory,
            StorageBackend::S3 => OpenOptions::S3 {
                bucket,
                key,
                region: connection_value(connection_string, "Region").unwrap_or_default(),
                endpoint_override: connection_value(connection_string, "EndpointOverride"),
            },
            StorageBackend::Azure if url.starts_with("azureSAS") => OpenOptions::AzurePresigned {
                base_url: format!("https://{}", rest),
                url_suffix: connection_value(connection_string, "Suffix").unwrap_or_default(),
            },
            StorageBackend::Azure => OpenOptions::Azure {
                connection_string: connection_string.to_string(),
                container: bucket,
                blob: key,
                parallelism: 4,
                max_execution_time: Duration::from_secs(100),
            },
            StorageBackend::GCS => OpenOptions::GoogleStorage {
                bucket,
                path_prefix: key,
            },
            StorageBackend::Http => OpenOptions::GenericUrl {
                url: url.to_string(),
                connection_string: connection_string.to_string(),
            },
        };
        Ok(options)
    }

    pub fn backend(&self) -> StorageBackend {
        match self {
            OpenOptions::LocalFile { .. } => StorageBackend::FileSystem,
            OpenOptions::InMemory => StorageBackend::InMemory,
            OpenOptions::S3 { .. } => StorageBackend::S3,
            OpenOptions::Azure { .. } => StorageBackend::Azure,
            OpenOptions::GoogleStorage { .. } => StorageBackend::GCS,
            OpenOptions::AzurePresigned { .. } | OpenOptions::GenericUrl { .. } => StorageBackend::Http,
        }
    }
}

/// Value of `key` in a `Key=Value;Key=Value` connection string
fn connection_value(connection_string: &str, key: &str) -> Option<String> {
    connection_string
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(key))
        .map(|(_, value)| value.trim().to_string())
}

/// Trait for I/O operations with cloud storage or file systems
#[async_trait]
pub trait IOManager: Send + Sync {
    /// Read data from a path
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to a path
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Check if a path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete data at a path
    async fn delete(&self, path: &str) -> Result<()>;

    /// List items with a given prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the size of data at a path
    async fn size(&self, path: &str) -> Result<usize>;

    /// Get the backend type
    fn backend(&self) -> StorageBackend;
}

/// File system I/O manager
pub struct FileSystemIOManager {
    base_path: PathBuf,
}

impl FileSystemIOManager {
    /// Create a new file system I/O manager
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Get the full path for a relative path
    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

#[async_trait]
impl IOManager for FileSystemIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let data = fs::read(self.full_path(path)).await?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.full_path(path)).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut entries = Vec::new();

        if fs::metadata(&full_path).await.map(|m| m.is_dir()).unwrap_or(false) {
            let mut read_dir = fs::read_dir(&full_path).await?;

            while let Some(entry) = read_dir.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn size(&self, path: &str) -> Result<usize> {
        let metadata = fs::metadata(self.full_path(path)).await?;
        Ok(metadata.len() as usize)
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::FileSystem
    }
}

/// Object store held in process memory
#[derive(Default)]
pub struct InMemoryIOManager {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryIOManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

#[async_trait]
impl IOManager for InMemoryIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| VdsError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| VdsError::NotFound(path.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn size(&self, path: &str) -> Result<usize> {
        self.read(path).await.map(|data| data.len())
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::InMemory
    }
}

/// I/O manager over plain HTTP object URLs (presigned or generic)
#[cfg(feature = "http-client")]
pub struct HttpIOManager {
    client: reqwest::Client,
    base_url: String,
    url_suffix: String,
    headers: Vec<(String, String)>,
}

#[cfg(feature = "http-client")]
impl HttpIOManager {
    pub fn new(base_url: impl Into<String>, url_suffix: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            url_suffix: url_suffix.into(),
            headers: Vec::new(),
        }
    }

    /// Send each `Key=Value` pair of a connection string as a header
    pub fn with_connection_string(mut self, connection_string: &str) -> Self {
        self.headers = connection_string
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base_url, path, self.url_suffix)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.headers.iter().fold(
            self.client.request(method, self.url(path)),
            |request, (name, value)| request.header(name.as_str(), value.as_str()),
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| VdsError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VdsError::NotFound(path.to_string()));
        }
        response
            .error_for_status()
            .map_err(|e| VdsError::Network(e.to_string()))
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl IOManager for HttpIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let response = self.send(self.request(reqwest::Method::GET, path), path).await?;
        response
            .bytes()
            .await
            .map_err(|e| VdsError::Network(e.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let request = self.request(reqwest::Method::PUT, path).body(data.to_vec());
        self.send(request, path).await.map(|_| ())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.send(self.request(reqwest::Method::HEAD, path), path).await {
            Ok(_) => Ok(true),
            Err(VdsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, path), path)
            .await
            .map(|_| ())
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(VdsError::Configuration(
            "Listing is not available over plain HTTP".to_string(),
        ))
    }

    async fn size(&self, path: &str) -> Result<usize> {
        let response = self.send(self.request(reqwest::Method::HEAD, path), path).await?;
        response
            .content_length()
            .map(|len| len as usize)
            .ok_or_else(|| VdsError::Network(format!("No content length for {}", path)))
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Http
    }
}

/// Create the I/O manager for a connection configuration
///
/// S3, Azure and Google Cloud Storage are not built in: open such volumes with
/// `Vds::open_with_io_manager` and an `IOManager` for the provider's SDK.
pub fn create_io_manager(options: &OpenOptions) -> Result<Arc<dyn IOManager>> {
    match options {
        OpenOptions::LocalFile { path } => {
            if path.as_os_str().is_empty() {
                return Err(VdsError::InvalidArgument("Empty file path".to_string()));
            }
            Ok(Arc::new(FileSystemIOManager::new(path)))
        }
        OpenOptions::InMemory => Ok(Arc::new(InMemoryIOManager::new())),
        #[cfg(feature = "http-client")]
        OpenOptions::AzurePresigned {
            base_url,
            url_suffix,
        } => Ok(Arc::new(HttpIOManager::new(base_url.clone(), url_suffix.clone()))),
        #[cfg(feature = "http-client")]
        OpenOptions::GenericUrl {
            url,
            connection_string,
        } => Ok(Arc::new(
            HttpIOManager::new(url.clone(), "").with_connection_string(connection_string),
        )),
        other => Err(VdsError::ConnectionFailure(format!(
            "No built-in {:?} backend; supply an IOManager for it",
            other.backend()
        ))),
    }
}
