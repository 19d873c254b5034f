//! Error types for nextgsim

use thiserror::Error;

/// Error types for the nextgsim library.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O errors while reading configuration or talking to the kernel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}
