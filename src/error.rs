use std::time::Duration;

use thiserror::Error;

use crate::{cmap::ServerAddress, spec::ElementType};

pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongo_core` crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,

    /// The document key associated with the error, if any.
    pub key: Option<String>,

    /// The array index associated with the error, if any.
    pub index: Option<usize>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(key) = self.key.as_deref() {
            write!(f, "Error at key \"{key}\": ")?;
        } else if let Some(index) = self.index {
            write!(f, "Error at array index {index}: ")?;
        }

        write!(f, "{}", self.kind)
    }
}

/// The types of errors that can occur in the `mongo_core` crate.
///
/// The variants fall into four families, see [`Error::is_format_error`],
/// [`Error::is_serialization_error`], [`Error::is_resource_error`] and
/// [`Error::is_topology_error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed BSON bytes were encountered.
    #[error("Malformed BSON: {message}")]
    #[non_exhaustive]
    MalformedValue { message: String },

    /// Invalid UTF-8 bytes were encountered.
    #[error("Invalid UTF-8")]
    Utf8Encoding,

    /// Malformed JSON text was encountered.
    #[error("Invalid JSON at position {position}: {message}")]
    #[non_exhaustive]
    Json { message: String, position: usize },

    /// A document contained the same element name twice where that is not allowed.
    #[error("Duplicate element name \"{name}\"")]
    #[non_exhaustive]
    DuplicateElementName { name: String },

    /// A [`std::io::Error`] occurred.
    #[error("An IO error occurred: {0}")]
    Io(std::io::Error),

    /// An error occurred when attempting to access a value in a document.
    #[error("An error occurred when attempting to access a document value: {kind}")]
    #[non_exhaustive]
    ValueAccess {
        /// The kind of error that occurred.
        kind: ValueAccessErrorKind,
    },

    /// An error related to the [`ObjectId`](crate::oid::ObjectId) type occurred.
    #[error("An ObjectId-related error occurred: {kind}")]
    #[non_exhaustive]
    ObjectId { kind: ObjectIdErrorKind },

    /// A value could not be mapped to or from its BSON representation.
    #[error("Serialization error: {message}")]
    #[non_exhaustive]
    Serialization { message: String },

    /// An element name that the writer has been configured to reject.
    #[error("Element name \"{name}\" is not valid")]
    #[non_exhaustive]
    InvalidElementName { name: String },

    /// A numeric conversion would lose information.
    #[error("{value} is out of range for {target}")]
    #[non_exhaustive]
    Overflow { value: String, target: &'static str },

    /// A required class member had no matching element.
    #[error("Missing element \"{name}\" for class {class}")]
    #[non_exhaustive]
    MissingElement { name: String, class: &'static str },

    /// An element had no matching class member and no extra elements member was mapped.
    #[error("Invalid element \"{name}\" for class {class}")]
    #[non_exhaustive]
    UnknownElement { name: String, class: &'static str },

    /// A discriminator could not be written or resolved.
    #[error("Discriminator error: {message}")]
    #[non_exhaustive]
    Discriminator { message: String },

    /// An invalid argument or configuration value was supplied.
    #[error("Invalid argument: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Too many threads were already waiting for a connection.
    #[error("Too many threads are already waiting for a connection to {address} (max {size})")]
    #[non_exhaustive]
    WaitQueueFull { address: ServerAddress, size: usize },

    /// A connection could not be acquired before the deadline.
    #[error("Timed out after {timeout:?} waiting for a connection to {address}")]
    #[non_exhaustive]
    WaitQueueTimeout {
        address: ServerAddress,
        timeout: Duration,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("The operation was cancelled")]
    Cancelled,

    /// An object was used after it was disposed.
    #[error("Cannot access a disposed {object}")]
    #[non_exhaustive]
    Disposed { object: &'static str },

    /// A connection could not be opened or failed during use.
    #[error("Connection to {address} failed: {message}")]
    #[non_exhaustive]
    ConnectionFailure {
        address: ServerAddress,
        message: String,
    },

    /// No server satisfying the selector could be found in time.
    #[error("Server selection failed: {message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The topology returned a server that does not satisfy the requested selector.
    #[error("Server {address} is incompatible with the requested server selector")]
    #[non_exhaustive]
    IncompatibleServer { address: ServerAddress },

    /// The server replied to a command with `{ ok: 0 }`.
    #[error("Command failed ({code}): {message}")]
    #[non_exhaustive]
    Command { code: i32, message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            key: None,
            index: None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        ErrorKind::Io(value).into()
    }
}

/// The types of errors that can occur when attempting to access a value in a document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValueAccessErrorKind {
    /// No value for the specified key was present in the document.
    #[error("The key was not present in the document")]
    NotPresent,

    /// The type of the value in the document did not match the requested type.
    #[error("Expected type {expected:?}, got type {actual:?}")]
    #[non_exhaustive]
    UnexpectedType {
        /// The actual type of the value.
        actual: ElementType,

        /// The expected type of the value.
        expected: ElementType,
    },
}

/// The kinds of errors that can occur when parsing an [`ObjectId`](crate::oid::ObjectId).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectIdErrorKind {
    /// An invalid character was found in the provided hex string.
    #[error("invalid character '{c}' was found at index {index}")]
    #[non_exhaustive]
    InvalidHexStringCharacter { c: char, index: usize },

    /// A hex string of the wrong length was provided.
    #[error("provided hex string had length {length}, expected 24")]
    #[non_exhaustive]
    InvalidHexStringLength { length: usize },
}

impl Error {
    pub(crate) fn with_key(mut self, key: impl Into<String>) -> Self {
        if self.key.is_none() && self.index.is_none() {
            self.key = Some(key.into());
        }
        self
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        if self.key.is_none() && self.index.is_none() {
            self.index = Some(index);
        }
        self
    }

    pub(crate) fn value_access_not_present() -> Self {
        ErrorKind::ValueAccess {
            kind: ValueAccessErrorKind::NotPresent,
        }
        .into()
    }

    pub(crate) fn value_access_unexpected_type(actual: ElementType, expected: ElementType) -> Self {
        ErrorKind::ValueAccess {
            kind: ValueAccessErrorKind::UnexpectedType { actual, expected },
        }
        .into()
    }

    pub(crate) fn malformed_value(message: impl ToString) -> Self {
        ErrorKind::MalformedValue {
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn json(message: impl ToString, position: usize) -> Self {
        ErrorKind::Json {
            message: message.to_string(),
            position,
        }
        .into()
    }

    pub(crate) fn duplicate_element_name(name: impl Into<String>) -> Self {
        ErrorKind::DuplicateElementName { name: name.into() }.into()
    }

    pub(crate) fn serialization(message: impl ToString) -> Self {
        ErrorKind::Serialization {
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn overflow(value: impl ToString, target: &'static str) -> Self {
        ErrorKind::Overflow {
            value: value.to_string(),
            target,
        }
        .into()
    }

    pub(crate) fn discriminator(message: impl ToString) -> Self {
        ErrorKind::Discriminator {
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl ToString) -> Self {
        ErrorKind::InvalidArgument {
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn disposed(object: &'static str) -> Self {
        ErrorKind::Disposed { object }.into()
    }

    pub(crate) fn connection_failure(address: &ServerAddress, message: impl ToString) -> Self {
        ErrorKind::ConnectionFailure {
            address: address.clone(),
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl ToString) -> Self {
        ErrorKind::ServerSelection {
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn datetime(error: impl ToString) -> Self {
        Self::malformed_value(format!("invalid datetime: {}", error.to_string()))
    }

    /// Whether this error was caused by malformed bytes or text.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::MalformedValue { .. }
                | ErrorKind::Utf8Encoding
                | ErrorKind::Json { .. }
                | ErrorKind::DuplicateElementName { .. }
                | ErrorKind::ObjectId { .. }
        )
    }

    /// Whether this error was caused by a value that could not be mapped to or from BSON.
    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Serialization { .. }
                | ErrorKind::InvalidElementName { .. }
                | ErrorKind::Overflow { .. }
                | ErrorKind::MissingElement { .. }
                | ErrorKind::UnknownElement { .. }
                | ErrorKind::Discriminator { .. }
        )
    }

    /// Whether this error was caused by pool or session resource limits. These errors may be
    /// retried after a backoff.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::WaitQueueFull { .. }
                | ErrorKind::WaitQueueTimeout { .. }
                | ErrorKind::Cancelled
                | ErrorKind::Disposed { .. }
        )
    }

    /// Whether this error was caused by server selection.
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ServerSelection { .. } | ErrorKind::IncompatibleServer { .. }
        )
    }

    /// Whether this error was raised by the network layer.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Io(..) | ErrorKind::ConnectionFailure { .. }
        )
    }

    #[cfg(test)]
    pub(crate) fn is_value_access_not_present(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ValueAccess {
                kind: ValueAccessErrorKind::NotPresent,
                ..
            }
        )
    }

    #[cfg(test)]
    pub(crate) fn is_value_access_unexpected_type(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ValueAccess {
                kind: ValueAccessErrorKind::UnexpectedType { .. },
                ..
            }
        )
    }

    #[cfg(test)]
    pub(crate) fn is_malformed_value(&self) -> bool {
        matches!(self.kind, ErrorKind::MalformedValue { .. },)
    }
}
