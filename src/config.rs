//! Engine configuration

use crate::compression::CompressionMethod;
use crate::error::{Result, VdsError};
use serde::{Deserialize, Serialize};

/// Tuning of the access manager of an opened volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessManagerConfig {
    /// Size of the worker pool running chunk tasks
    pub worker_threads: usize,
    /// Chunk tasks a single request runs at once
    pub max_concurrent_chunk_tasks: usize,
    /// Page budget of the accessors shared by requests, per layer
    pub request_page_budget: usize,
    /// Extra attempts for a failed chunk upload
    pub upload_retry_attempts: u32,
    /// Chunks described by one chunk metadata page
    pub chunk_metadata_page_size: usize,
}

impl Default for AccessManagerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            worker_threads: cores.min(8),
            max_concurrent_chunk_tasks: 16,
            request_page_budget: 100,
            upload_retry_attempts: 2,
            chunk_metadata_page_size: 1024,
        }
    }
}

impl AccessManagerConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VdsError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(VdsError::Configuration(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_chunk_tasks == 0 {
            return Err(VdsError::Configuration(
                "max_concurrent_chunk_tasks must be at least 1".to_string(),
            ));
        }
        if self.chunk_metadata_page_size == 0 {
            return Err(VdsError::Configuration(
                "chunk_metadata_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_max_concurrent_chunk_tasks(mut self, tasks: usize) -> Self {
        self.max_concurrent_chunk_tasks = tasks;
        self
    }

    pub fn with_request_page_budget(mut self, pages: usize) -> Self {
        self.request_page_budget = pages;
        self
    }

    pub fn with_upload_retry_attempts(mut self, attempts: u32) -> Self {
        self.upload_retry_attempts = attempts;
        self
    }

    pub fn with_chunk_metadata_page_size(mut self, size: usize) -> Self {
        self.chunk_metadata_page_size = size;
        self
    }
}

/// Settings applied when a volume is created
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub compression: CompressionMethod,
    pub compression_tolerance: f32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Zstd,
            compression_tolerance: 0.0,
        }
    }
}

impl CreateOptions {
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn with_compression_tolerance(mut self, tolerance: f32) -> Self {
        self.compression_tolerance = tolerance;
        self
    }
}
