//! # Database Configuration
//!
//! [`DatabaseConfig`] collects everything needed to open a [`crate::Database`]:
//! where the file lives, how temporal columns are formatted, which key
//! provider seals encrypted columns, and the busy timeout.
//!
//! ```rust
//! use std::time::Duration;
//! use rowdb::{DatabaseConfig, PasswordKeyProvider, TemporalFormat};
//!
//! let config = DatabaseConfig::in_memory()
//!     .with_key_provider(PasswordKeyProvider::new("correct horse"))
//!     .with_temporal_format(TemporalFormat::Pattern("%Y-%m-%d %H:%M:%S".into()))
//!     .with_busy_timeout(Duration::from_secs(2));
//! assert!(config.path.is_none());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::codec::{Codec, TemporalFormat};
use crate::crypto::{ColumnCryptor, EnvKeyProvider, KeyProvider, MASTER_KEY_ENV_VAR};
use crate::error::Result;

/// Default time SQLite waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for opening a database.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,

    /// Source of the master key for encrypted columns.
    ///
    /// Without one, encrypted columns are written as `NULL` (and an error is
    /// logged) rather than stored in clear text.
    pub key_provider: Option<Arc<dyn KeyProvider>>,

    /// Text format for temporal columns.
    pub temporal_format: TemporalFormat,

    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            key_provider: None,
            temporal_format: TemporalFormat::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Default configuration, plus an [`EnvKeyProvider`] when
    /// `ROWDB_MASTER_KEY` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is set but is not a valid key.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if std::env::var_os(MASTER_KEY_ENV_VAR).is_some() {
            debug!(var = MASTER_KEY_ENV_VAR, "using master key from environment");
            config.key_provider = Some(Arc::new(EnvKeyProvider::from_env()?));
        }
        Ok(config)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_key_provider(mut self, provider: impl KeyProvider + 'static) -> Self {
        self.key_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_temporal_format(mut self, format: TemporalFormat) -> Self {
        self.temporal_format = format;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Builds the codec this configuration describes.
    pub(crate) fn codec(&self) -> Codec {
        Codec::new(
            self.temporal_format.clone(),
            self.key_provider
                .as_ref()
                .map(|provider| ColumnCryptor::new(Arc::clone(provider))),
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("path", &self.path)
            .field("key_provider", &self.key_provider.is_some())
            .field("temporal_format", &self.temporal_format)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}
