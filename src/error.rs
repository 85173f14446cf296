//! Error Handling
//!
//! Error type definitions used in gh-reposettings

use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Error types for gh-reposettings
#[derive(Error, Debug)]
pub enum Error {
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    #[error("Invalid repository format: {0} (expected 'owner/repo' or 'https://host/owner/repo')")]
    InvalidRepositoryFormat(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Repository store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Create a new configuration validation error
    pub fn config_validation<S: Into<String>>(message: S) -> Self {
        Error::ConfigValidation(message.into())
    }

    /// Process exit code reported by the CLI for this error
    ///
    /// Loading failures map to 2, credential failures to 3, and everything
    /// raised during validation or reconciliation to 10.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Yaml(_) | Error::Io(_) => 2,
            Error::MissingCredential(_) => 3,
            Error::ConfigValidation(_) | Error::InvalidRepositoryFormat(_) | Error::Store(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.exit_code(), 2);

        let yaml = serde_yaml::from_str::<serde_yaml::Value>("a: [").unwrap_err();
        assert_eq!(Error::from(yaml).exit_code(), 2);

        assert_eq!(Error::MissingCredential("GITHUB_TOKEN".into()).exit_code(), 3);
        assert_eq!(Error::config_validation("no repos").exit_code(), 10);
        assert_eq!(Error::from(StoreError::RateLimited).exit_code(), 10);
    }
}
