//! Shared helpers for the integration tests

#![allow(dead_code)] // Each test binary uses a different subset

use autozone::{
    config::AutoConfig,
    dispatch::{Protocol, Request, ZoneDispatcher},
    dns::{
        DNSPacket,
        enums::{DNSResourceClass, DNSResourceType},
        question::DNSQuestion,
    },
    zone::{ZoneLoader, ZoneTable, ZoneTransfer},
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Zone file text with the given serial and extra record lines
pub fn zone_text(serial: u32, extra: &str) -> String {
    format!(
        "$TTL 300
@       IN SOA ns1 hostmaster {} 3600 900 604800 60
@       IN NS  ns1
ns1     IN A   192.0.2.53
{}",
        serial, extra
    )
}

/// Write `contents` to `name` inside `dir`
pub fn write_zone(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

/// A loader over `dir` publishing into a fresh table under `origins`
pub fn loader_for(dir: &TempDir, origins: &[&str]) -> (ZoneLoader, Arc<ZoneTable>) {
    let config = AutoConfig {
        directory: dir.path().to_path_buf(),
        origins: origins.iter().map(|o| o.to_string()).collect(),
        ..Default::default()
    };
    let table = Arc::new(ZoneTable::new(&config.origins).unwrap());
    let loader = ZoneLoader::new(table.clone(), &config).unwrap();
    (loader, table)
}

/// Dispatcher over `table` allowing transfers to everyone
pub fn dispatcher_for(table: Arc<ZoneTable>) -> ZoneDispatcher {
    ZoneDispatcher::new(table, ZoneTransfer::new(&["*".to_string()], 16 * 1024))
}

pub fn create_test_query(domain: &str, qtype: DNSResourceType) -> DNSPacket {
    create_test_query_with_id(1234, domain, qtype)
}

pub fn create_test_query_with_id(id: u16, domain: &str, qtype: DNSResourceType) -> DNSPacket {
    let mut packet = DNSPacket::query(
        id,
        DNSQuestion::new(domain, qtype, DNSResourceClass::IN),
    );
    packet.header.rd = true;
    packet
}

pub fn udp_request(domain: &str, qtype: DNSResourceType) -> Request {
    Request::new(
        create_test_query(domain, qtype),
        "127.0.0.1:53000".parse().unwrap(),
        Protocol::Udp,
    )
}

pub fn tcp_request(domain: &str, qtype: DNSResourceType) -> Request {
    Request::new(
        create_test_query(domain, qtype),
        "127.0.0.1:53000".parse().unwrap(),
        Protocol::Tcp,
    )
}
