pub mod config;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod http_server;
pub mod metrics;
pub mod resolver;
pub mod server;
pub mod zone;

pub use config::AutoConfig;
pub use dispatch::{DnsHandler, Protocol, Request, Served, ZoneDispatcher};
pub use dns::DNSPacket;
pub use zone::{ZoneLoader, ZoneTable};
