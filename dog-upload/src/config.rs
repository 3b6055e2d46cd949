use std::time::Duration;

/// Configuration for the resumable upload adapter
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Metadata attribute the upload id is taken from
    pub identity_attribute: String,

    /// Metadata attribute used to build the data object's content disposition
    pub filename_attribute: String,

    /// Lifetime of download URLs when the caller does not pass one
    pub signed_url_ttl: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            identity_attribute: "filehash".to_string(),
            filename_attribute: "filename".to_string(),
            signed_url_ttl: Duration::from_secs(3600),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Take upload ids from a different metadata attribute
    pub fn with_identity_attribute<S: Into<String>>(mut self, attribute: S) -> Self {
        self.identity_attribute = attribute.into();
        self
    }

    /// Read the download filename from a different metadata attribute
    pub fn with_filename_attribute<S: Into<String>>(mut self, attribute: S) -> Self {
        self.filename_attribute = attribute.into();
        self
    }

    /// Set the default signed URL lifetime
    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }
}
