//! Error types for the orchestration engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a policy or orchestrating it
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Failed to write configuration file
    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host command or query error
    #[error(transparent)]
    Rules(#[from] wgnet_rules::Error),

    /// The named config does not exist
    #[error("config file for '{0}' does not exist")]
    ConfigNotFound(String),

    /// Refusing to overwrite a config
    #[error("config file '{}' exists", .0.display())]
    ConfigExists(PathBuf),

    /// The config directory is missing
    #[error("directory {} does not exist", .0.display())]
    ConfigDirMissing(PathBuf),

    /// The policy does not name an interface
    #[error("no interface set in config")]
    MissingInterface,

    /// wg-quick has no config for the interface
    #[error("{0}: interface config doesn't exist, permission error?")]
    InterfaceConfigMissing(String),

    /// Querying the interface was refused
    #[error("permission denied for interface '{0}', are you root?")]
    PermissionDenied(String),
}

impl Error {
    /// Errors raised before any host state was touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::ConfigNotFound(_)
                | Error::MissingInterface
                | Error::InterfaceConfigMissing(_)
        )
    }

    /// Check if this is a permission error
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::PermissionDenied(_) => true,
            Error::Rules(e) => e.is_permission_denied(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}
