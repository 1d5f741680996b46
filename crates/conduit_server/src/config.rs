//! Server configuration.

use std::time::Duration;

/// Configuration for the object server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest accepted encoded object, in bytes.
    pub max_object_size: usize,
    /// Largest accepted number of objects per upload.
    pub max_upload_batch: usize,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits and no authentication.
    pub fn new() -> Self {
        Self {
            max_object_size: 16 * 1024 * 1024,
            max_upload_batch: 10_000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum object size.
    pub fn with_max_object_size(mut self, bytes: usize) -> Self {
        self.max_object_size = bytes;
        self
    }

    /// Sets the maximum upload batch.
    pub fn with_max_upload_batch(mut self, objects: usize) -> Self {
        self.max_upload_batch = objects;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_object_size, 16 * 1024 * 1024);
        assert!(!config.require_auth);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_object_size(1024)
            .with_max_upload_batch(50)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_object_size, 1024);
        assert_eq!(config.max_upload_batch, 50);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
    }
}
