pub mod errors;
pub mod loader;
pub mod notify;
pub mod parser;
pub mod record;
pub mod table;
pub mod transfer;
#[allow(clippy::module_inception)]
pub mod zone;

pub use errors::{Result, ZoneError};
pub use loader::{ReloadHandle, ReloadReport, ZoneLoader};
pub use notify::ZoneNotifier;
pub use parser::ZoneParser;
pub use record::ZoneRecord;
pub use table::ZoneTable;
pub use transfer::ZoneTransfer;
pub use zone::{Lookup, LookupResult, Zone, ZoneDelta};

/// Zone constants
pub mod constants {
    /// Default TTL if neither $TTL nor the SOA provide one (1 hour)
    pub const DEFAULT_TTL: u32 = 3600;

    /// Maximum zone file size (10MB)
    pub const MAX_ZONE_FILE_SIZE: u64 = 10 * 1024 * 1024;

    /// IXFR history kept per zone
    pub const MAX_JOURNAL_ENTRIES: usize = 16;

    /// CNAME hops followed inside one zone
    pub const MAX_CNAME_CHAIN: usize = 8;

    /// Default size of one AXFR message
    pub const TRANSFER_MESSAGE_SIZE: usize = 16 * 1024;
}
