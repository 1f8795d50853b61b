use std::fmt;

/// Zone-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneError {
    /// Zone file parsing error
    ParseError(String),
    /// Invalid record format
    InvalidRecord(String),
    /// Missing SOA record
    MissingSOA,
    /// Duplicate SOA record
    DuplicateSOA,
    /// SOA owner differs from the zone origin
    SOAOwnerMismatch { owner: String, origin: String },
    /// Invalid domain name
    InvalidDomainName(String),
    /// Record owner outside the zone
    OutOfZone { name: String, origin: String },
    /// CNAME sharing its owner with other data
    CNAMEConflict(String),
    /// IO error
    IoError(String),
    /// Zone file too large
    FileTooLarge { size: u64, limit: u64 },
    /// Invalid TTL value
    InvalidTTL(String),
    /// Invalid resource record type
    InvalidRRType(String),
}

impl fmt::Display for ZoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "Zone parse error: {}", msg),
            Self::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            Self::MissingSOA => write!(f, "Zone missing required SOA record"),
            Self::DuplicateSOA => write!(f, "Zone contains duplicate SOA records"),
            Self::SOAOwnerMismatch { owner, origin } => {
                write!(f, "SOA owner {} does not match zone origin {}", owner, origin)
            }
            Self::InvalidDomainName(name) => write!(f, "Invalid domain name: {}", name),
            Self::OutOfZone { name, origin } => {
                write!(f, "Record {} is outside zone {}", name, origin)
            }
            Self::CNAMEConflict(name) => {
                write!(f, "CNAME at {} cannot coexist with other data", name)
            }
            Self::IoError(msg) => write!(f, "IO error: {}", msg),
            Self::FileTooLarge { size, limit } => write!(
                f,
                "Zone file of {} bytes exceeds maximum size of {} bytes",
                size, limit
            ),
            Self::InvalidTTL(ttl) => write!(f, "Invalid TTL value: {}", ttl),
            Self::InvalidRRType(rtype) => write!(f, "Invalid resource record type: {}", rtype),
        }
    }
}

impl std::error::Error for ZoneError {}

impl From<std::io::Error> for ZoneError {
    fn from(e: std::io::Error) -> Self {
        ZoneError::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ZoneError>;
