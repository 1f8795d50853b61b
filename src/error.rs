use thiserror::Error;

use crate::dns::enums::ResponseCode;

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Invalid name pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid name template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid address {value} for {field}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Duplicate origin: {0}")]
    DuplicateOrigin(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("Cannot scan zone directory {path}: {reason}")]
    Scan { path: String, reason: String },
}

/// Failures raised while answering a single query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Query has no question")]
    MissingQuestion,

    #[error("Unsupported query class: {0}")]
    UnsupportedClass(u16),

    #[error("No next handler for {0}")]
    NoNextHandler(String),

    #[error("Zone {0} is not loaded")]
    ZoneUnavailable(String),

    #[error("Cannot encode response: {0}")]
    Encode(String),
}

impl HandlerError {
    /// Rcode of the failure reply sent for this error
    pub fn rcode(&self) -> ResponseCode {
        match self {
            HandlerError::MissingQuestion
            | HandlerError::UnsupportedClass(_)
            | HandlerError::NoNextHandler(_)
            | HandlerError::ZoneUnavailable(_)
            | HandlerError::Encode(_) => ResponseCode::ServerFailure,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Client {0} is not allowed to transfer zones")]
    NotAllowed(String),

    #[error("AXFR is not available over UDP")]
    UdpNotAllowed,

    #[error("Transfer question {qname} does not name zone {zone}")]
    NotZoneApex { qname: String, zone: String },

    #[error("Cannot encode transfer message: {0}")]
    Encode(String),
}

impl TransferError {
    pub fn rcode(&self) -> ResponseCode {
        match self {
            TransferError::NotAllowed(_) => ResponseCode::Refused,
            TransferError::UdpNotAllowed
            | TransferError::NotZoneApex { .. }
            | TransferError::Encode(_) => ResponseCode::ServerFailure,
        }
    }
}

/// Failures delivering one NOTIFY message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("No acknowledgement within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid acknowledgement: {0}")]
    InvalidResponse(String),

    #[error("Secondary answered {0}")]
    Rcode(String),
}

impl From<std::io::Error> for NotifyError {
    fn from(err: std::io::Error) -> Self {
        NotifyError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_rcodes() {
        assert_eq!(
            HandlerError::UnsupportedClass(3).rcode(),
            ResponseCode::ServerFailure
        );
        assert_eq!(
            HandlerError::NoNextHandler("example.org.".into()).rcode(),
            ResponseCode::ServerFailure
        );
        assert_eq!(
            TransferError::NotAllowed("192.0.2.1".into()).rcode(),
            ResponseCode::Refused
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ConfigError::InvalidAddress {
            field: "bind_addr",
            value: "nowhere".into(),
        };
        assert_eq!(err.to_string(), "Invalid address nowhere for bind_addr");
    }
}
