use thiserror::Error;

/// The category of a loader failure, as surfaced to callers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed metadata or a violated loader invariant.
    Program,
    /// A missing assembly, import, or export.
    Link,
    /// An arity or constraint failure on a generic argument.
    Generic,
    /// A cyclic value-type dependency or cyclic constraint.
    Circular,
}

/// An error aborting the current top-level request. The loader state is
/// unchanged when one of these is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("program error: {0}")]
    Program(String),
    #[error("link error: {0}")]
    Link(String),
    #[error("generic argument error: {0}")]
    Generic(String),
    #[error("circular dependency: {0}")]
    Circular(String),
}

impl LoaderError {
    pub fn program(msg: impl Into<String>) -> Self {
        LoaderError::Program(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        LoaderError::Link(msg.into())
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        LoaderError::Generic(msg.into())
    }

    pub fn circular(msg: impl Into<String>) -> Self {
        LoaderError::Circular(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::Program(_) => ErrorKind::Program,
            LoaderError::Link(_) => ErrorKind::Link,
            LoaderError::Generic(_) => ErrorKind::Generic,
            LoaderError::Circular(_) => ErrorKind::Circular,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
