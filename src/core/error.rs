use std::fmt;
use thiserror::Error;

/// Backend a [`DbError::Backend`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Relational,
    Cache,
    Search,
    Audit,
    Sequence,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Relational => "relational",
            BackendKind::Cache => "cache",
            BackendKind::Search => "search",
            BackendKind::Audit => "audit",
            BackendKind::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation error in '{table}': {message}")]
    Validation { table: String, message: String },

    #[error("Forbidden: '{action}' on '{resource}' ({reason})")]
    Forbidden {
        resource: String,
        action: String,
        reason: String,
    },

    #[error("Not found in '{table}': {}", keys.join(", "))]
    NotFound { table: String, keys: Vec<String> },

    #[error("Filter syntax error at token {position} ('{token}'): {message}")]
    FilterSyntax {
        token: String,
        position: usize,
        message: String,
    },

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lock scope error: {0}")]
    LockScope(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Backend error ({backend}): {message}")]
    Backend { backend: BackendKind, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<DbError>,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    FilterSyntax,
    Filter,
    Configuration,
    LockScope,
    Transaction,
    Backend,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::FilterSyntax => "FILTER_SYNTAX_ERROR",
            ErrorKind::Filter => "FILTER_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::LockScope => "LOCK_SCOPE_ERROR",
            ErrorKind::Transaction => "TRANSACTION_ERROR",
            ErrorKind::Backend => "BACKEND_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl DbError {
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(
        resource: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Forbidden {
            resource: resource.into(),
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(table: impl Into<String>, keys: Vec<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            keys,
        }
    }

    pub fn syntax(token: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self::FilterSyntax {
            token: token.into(),
            position,
            message: message.into(),
        }
    }

    pub fn backend(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Classification of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Validation { .. } => ErrorKind::Validation,
            DbError::Forbidden { .. } => ErrorKind::Forbidden,
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::FilterSyntax { .. } => ErrorKind::FilterSyntax,
            DbError::Filter(_) => ErrorKind::Filter,
            DbError::Configuration(_) => ErrorKind::Configuration,
            DbError::LockScope(_) => ErrorKind::LockScope,
            DbError::Transaction(_) => ErrorKind::Transaction,
            DbError::Backend { .. } => ErrorKind::Backend,
            DbError::Internal(_) => ErrorKind::Internal,
            DbError::Operation { source, .. } => source.kind(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Operation name this error was tagged with, if any.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            DbError::Operation { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// The untagged error.
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Tag the error with the public operation that raised it.
    /// An already tagged error keeps its original (innermost) operation.
    pub fn in_operation(self, operation: &'static str) -> Self {
        match self {
            tagged @ DbError::Operation { .. } => tagged,
            other => DbError::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }
}

/// Tags the error of a `Result` with an operation name.
pub trait OperationContext<T> {
    fn operation(self, operation: &'static str) -> Result<T>;
}

impl<T> OperationContext<T> for Result<T> {
    fn operation(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.in_operation(operation))
    }
}
