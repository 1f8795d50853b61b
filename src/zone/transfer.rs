//! Zone transfer implementation (AXFR/IXFR)
//!
//! Full transfers follow RFC 5936 and incremental transfers RFC 1995.
//! Incremental answers come from the journal each zone carries across
//! reloads; without history the client receives a full transfer.

use super::{Zone, ZoneDelta, zone::serial_gt};
use crate::dispatch::Protocol;
use crate::dns::{
    DNSPacket,
    enums::{DNSResourceType, ResponseCode},
    header::HEADER_SIZE,
    resource::DNSResource,
};
use crate::error::TransferError;
use crate::metrics::AutoMetrics;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serves AXFR and IXFR requests to allowed secondaries
pub struct ZoneTransfer {
    allow_any: bool,
    allowed: Vec<IpAddr>,
    message_size: usize,
    metrics: Option<Arc<AutoMetrics>>,
}

impl ZoneTransfer {
    /// `transfer_to` holds client addresses (a port is ignored) or `*`
    pub fn new(transfer_to: &[String], message_size: usize) -> Self {
        let allow_any = transfer_to.iter().any(|t| t == "*");
        let allowed = transfer_to
            .iter()
            .filter(|t| t.as_str() != "*")
            .filter_map(|t| {
                t.parse::<IpAddr>()
                    .ok()
                    .or_else(|| t.parse::<SocketAddr>().ok().map(|a| a.ip()))
            })
            .collect();

        Self {
            allow_any,
            allowed,
            message_size: message_size.min(u16::MAX as usize),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AutoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_allowed(&self, client: &SocketAddr) -> bool {
        self.allow_any || self.allowed.contains(&client.ip())
    }

    /// Answer a transfer request for `zone`.
    ///
    /// Returns the response messages in order. A refused client gets
    /// [`TransferError::NotAllowed`] and malformed requests get the other
    /// variants; the caller turns those into replies.
    pub fn serve(
        &self,
        zone: &Zone,
        query: &DNSPacket,
        client: SocketAddr,
        protocol: Protocol,
    ) -> Result<Vec<DNSPacket>, TransferError> {
        if !self.is_allowed(&client) {
            warn!("Zone transfer of {} denied for client {}", zone.origin, client);
            return Err(TransferError::NotAllowed(client.ip().to_string()));
        }

        let question = query.questions.first().ok_or_else(|| {
            TransferError::NotZoneApex {
                qname: String::new(),
                zone: zone.origin.clone(),
            }
        })?;
        let qname = question.qname();
        if qname != zone.origin {
            return Err(TransferError::NotZoneApex {
                qname,
                zone: zone.origin.clone(),
            });
        }

        match question.qtype {
            DNSResourceType::AXFR => {
                if protocol == Protocol::Udp {
                    return Err(TransferError::UdpNotAllowed);
                }
                info!("AXFR of zone {} serial {} to {}", zone.origin, zone.serial, client);
                self.record("axfr");
                self.split(query, full_transfer(zone))
            }
            _ => self.serve_ixfr(zone, query, client, protocol),
        }
    }

    fn serve_ixfr(
        &self,
        zone: &Zone,
        query: &DNSPacket,
        client: SocketAddr,
        protocol: Protocol,
    ) -> Result<Vec<DNSPacket>, TransferError> {
        self.record("ixfr");

        let client_serial = query
            .authorities
            .iter()
            .find(|r| r.rtype == DNSResourceType::SOA)
            .and_then(|soa| soa.soa_serial());

        let Some(client_serial) = client_serial else {
            debug!("IXFR for {} without a client SOA, sending full transfer", zone.origin);
            return self.fallback(zone, query, protocol);
        };

        if client_serial == zone.serial || serial_gt(client_serial, zone.serial) {
            debug!(
                "IXFR for {} from {}: client serial {} is current",
                zone.origin, client, client_serial
            );
            return self.split(query, vec![zone.soa().clone()]);
        }

        if protocol == Protocol::Udp {
            return self.split(query, vec![zone.soa().clone()]);
        }

        match zone.deltas_since(client_serial) {
            Some(deltas) => {
                info!(
                    "IXFR of zone {} from serial {} to {} ({} steps) to {}",
                    zone.origin,
                    client_serial,
                    zone.serial,
                    deltas.len(),
                    client
                );
                self.split(query, incremental_transfer(zone, deltas))
            }
            None => {
                debug!(
                    "No history from serial {} for zone {}, sending full transfer",
                    client_serial, zone.origin
                );
                self.fallback(zone, query, protocol)
            }
        }
    }

    /// Full transfer in place of an IXFR; UDP clients get the SOA and retry
    /// over TCP
    fn fallback(
        &self,
        zone: &Zone,
        query: &DNSPacket,
        protocol: Protocol,
    ) -> Result<Vec<DNSPacket>, TransferError> {
        match protocol {
            Protocol::Udp => self.split(query, vec![zone.soa().clone()]),
            Protocol::Tcp => self.split(query, full_transfer(zone)),
        }
    }

    /// Pack `records` into messages no larger than the configured size
    fn split(
        &self,
        query: &DNSPacket,
        records: Vec<DNSResource>,
    ) -> Result<Vec<DNSPacket>, TransferError> {
        let base = response_base(query);
        let fixed = HEADER_SIZE
            + query
                .questions
                .iter()
                .map(|q| q.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 5)
                .sum::<usize>();

        let mut messages = Vec::new();
        let mut current = base.clone();
        let mut size = fixed;

        for record in records {
            let record_size = record.wire_size();
            if size + record_size > self.message_size && !current.answers.is_empty() {
                messages.push(std::mem::replace(&mut current, base.clone()));
                size = fixed;
            }
            if fixed + record_size > u16::MAX as usize {
                return Err(TransferError::Encode(format!(
                    "record {} {} does not fit a message",
                    record.owner(),
                    record.rtype.mnemonic()
                )));
            }
            size += record_size;
            current.answers.push(record);
        }
        messages.push(current);

        debug!("Transfer split into {} messages", messages.len());
        Ok(messages)
    }

    fn record(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transfer(kind);
        }
    }
}

fn response_base(query: &DNSPacket) -> DNSPacket {
    let mut reply = DNSPacket::reply_to(query);
    reply.header.aa = true;
    reply.header.rcode = ResponseCode::NoError.to_u8();
    reply.compress = true;
    reply
}

/// SOA, every other record once, SOA
fn full_transfer(zone: &Zone) -> Vec<DNSResource> {
    let soa = zone.soa().clone();
    let mut records = Vec::with_capacity(zone.record_count() + 1);
    records.push(soa.clone());
    records.extend(zone.records().cloned());
    records.push(soa);
    records
}

/// RFC 1995 sequence: current SOA, then per step the old SOA, removed
/// records, new SOA, added records, and the current SOA again
fn incremental_transfer(zone: &Zone, deltas: &[ZoneDelta]) -> Vec<DNSResource> {
    let mut records = vec![zone.soa().clone()];
    for delta in deltas {
        records.push(delta.old_soa.clone());
        records.extend(delta.removed.iter().cloned());
        records.push(delta.new_soa.clone());
        records.extend(delta.added.iter().cloned());
    }
    records.push(zone.soa().clone());
    records
}
