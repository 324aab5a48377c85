use std::time::Duration;

use crate::{BlobError, BlobResult, ContentEncryption};

/// Page blobs are written in whole 512-byte pages
pub const PAGE_SIZE: u64 = 512;

/// Configuration for chunked uploads
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Chunk size for block blobs
    pub max_block_size: u64,

    /// Chunk size for page blobs, must be a multiple of [`PAGE_SIZE`]
    pub max_page_size: u64,

    /// Chunk size for append blobs
    pub max_append_size: u64,

    /// Number of concurrent chunk uploads. 1 means sequential.
    pub max_connections: usize,

    /// Send a Content-MD5 with each chunk so the service can validate it
    pub validate_content: bool,

    /// Lease held on the destination blob, if any
    pub lease_id: Option<String>,

    /// Per-request timeout handed to the store
    pub timeout: Option<Duration>,

    /// If-match etag checked when a page blob is (re)created
    pub if_match: Option<String>,

    /// Maximum blob length for append blobs
    pub maxsize_condition: Option<u64>,

    /// Client-side content encryption
    pub encryption: Option<ContentEncryption>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_block_size: 4 * 1024 * 1024,  // 4MB
            max_page_size: 4 * 1024 * 1024,   // 4MB
            max_append_size: 4 * 1024 * 1024, // 4MB
            max_connections: 2,
            validate_content: false,
            lease_id: None,
            timeout: None,
            if_match: None,
            maxsize_condition: None,
            encryption: None,
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set block blob chunk size
    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.max_block_size = bytes;
        self
    }

    /// Set page blob chunk size
    pub fn with_page_size(mut self, bytes: u64) -> Self {
        self.max_page_size = bytes;
        self
    }

    /// Set append blob chunk size
    pub fn with_append_size(mut self, bytes: u64) -> Self {
        self.max_append_size = bytes;
        self
    }

    /// Set number of concurrent uploads
    pub fn with_max_connections(mut self, connections: usize) -> Self {
        self.max_connections = connections;
        self
    }

    /// Upload sequentially
    pub fn sequential(mut self) -> Self {
        self.max_connections = 1;
        self
    }

    /// Send Content-MD5 for every chunk
    pub fn validate_content(mut self) -> Self {
        self.validate_content = true;
        self
    }

    /// Set lease id
    pub fn with_lease<S: Into<String>>(mut self, lease_id: S) -> Self {
        self.lease_id = Some(lease_id.into());
        self
    }

    /// Set per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set initial if-match etag
    pub fn with_if_match<S: Into<String>>(mut self, etag: S) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    /// Set append blob max size condition
    pub fn with_maxsize_condition(mut self, bytes: u64) -> Self {
        self.maxsize_condition = Some(bytes);
        self
    }

    /// Enable client-side encryption
    pub fn with_encryption(mut self, encryption: ContentEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// True when more than one chunk may be in flight
    pub fn is_parallel(&self) -> bool {
        self.max_connections > 1
    }

    /// Check the config before any I/O happens
    pub fn validate(&self) -> BlobResult<()> {
        if self.max_connections == 0 {
            return Err(BlobError::invalid("max_connections must be at least 1"));
        }
        for (name, size) in [
            ("max_block_size", self.max_block_size),
            ("max_page_size", self.max_page_size),
            ("max_append_size", self.max_append_size),
        ] {
            if size == 0 {
                return Err(BlobError::invalid(format!("{} must be greater than 0", name)));
            }
        }
        if self.max_page_size % PAGE_SIZE != 0 {
            return Err(BlobError::invalid(format!(
                "max_page_size {} is not a multiple of {}",
                self.max_page_size, PAGE_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = UploadConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_parallel());
    }

    #[test]
    fn test_rejects_zero_connections() {
        let config = UploadConfig::new().with_max_connections(0);
        assert!(matches!(config.validate(), Err(BlobError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_unaligned_page_size() {
        let config = UploadConfig::new().with_page_size(1000);
        assert!(matches!(config.validate(), Err(BlobError::Invalid { .. })));
    }

    #[test]
    fn test_sequential_builder() {
        let config = UploadConfig::new().with_max_connections(8).sequential();
        assert_eq!(config.max_connections, 1);
        assert!(!config.is_parallel());
    }
}
