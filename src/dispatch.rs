//! Query dispatch to the zone owning the question name.
//!
//! Names outside every configured origin are passed to the next handler in
//! the chain. Names inside an origin are answered from the zone with the
//! longest matching suffix, even when no such zone is loaded.

use crate::dns::{
    DNSPacket, MAX_TCP_MESSAGE_SIZE,
    enums::{DNSResourceClass, Opcode, ResponseCode},
};
use crate::error::{HandlerError, TransferError};
use crate::metrics::AutoMetrics;
use crate::zone::{LookupResult, Zone, ZoneTable, ZoneTransfer};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Transport a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }

    /// Largest response the requestor accepts over this transport
    pub fn max_response_size(&self, query: &DNSPacket) -> usize {
        match self {
            Protocol::Tcp => MAX_TCP_MESSAGE_SIZE,
            Protocol::Udp => query.max_udp_payload_size() as usize,
        }
    }
}

/// One incoming query
#[derive(Debug, Clone)]
pub struct Request {
    pub packet: DNSPacket,
    pub client: SocketAddr,
    pub protocol: Protocol,
}

impl Request {
    pub fn new(packet: DNSPacket, client: SocketAddr, protocol: Protocol) -> Self {
        Self {
            packet,
            client,
            protocol,
        }
    }
}

/// Outcome of handling a request.
///
/// An empty `messages` list means the transport answers with a header-only
/// reply carrying `rcode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub rcode: ResponseCode,
    pub messages: Vec<DNSPacket>,
}

impl Served {
    pub fn failure(rcode: ResponseCode) -> Self {
        Self {
            rcode,
            messages: Vec::new(),
        }
    }

    pub fn reply(message: DNSPacket) -> Self {
        Self {
            rcode: message.rcode().unwrap_or(ResponseCode::ServerFailure),
            messages: vec![message],
        }
    }

    pub fn is_failure(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages to put on the wire in answer to `query`
    pub fn into_messages(self, query: &DNSPacket) -> Vec<DNSPacket> {
        if self.messages.is_empty() {
            vec![DNSPacket::error_reply(query, self.rcode)]
        } else {
            self.messages
        }
    }
}

/// A link in the query handling chain
#[async_trait]
pub trait DnsHandler: Send + Sync {
    async fn serve(&self, request: &Request) -> Result<Served, HandlerError>;
}

/// Run `handler` and turn any outcome into wire messages
pub async fn respond(handler: &dyn DnsHandler, request: &Request) -> Vec<DNSPacket> {
    match handler.serve(request).await {
        Ok(served) => served.into_messages(&request.packet),
        Err(e) => {
            debug!("Query from {} failed: {}", request.client, e);
            vec![DNSPacket::error_reply(&request.packet, e.rcode())]
        }
    }
}

/// Answers queries from the zones in a [`ZoneTable`]
pub struct ZoneDispatcher {
    table: Arc<ZoneTable>,
    transfer: ZoneTransfer,
    next: Option<Arc<dyn DnsHandler>>,
    metrics: Option<Arc<AutoMetrics>>,
}

impl ZoneDispatcher {
    pub fn new(table: Arc<ZoneTable>, transfer: ZoneTransfer) -> Self {
        Self {
            table,
            transfer,
            next: None,
            metrics: None,
        }
    }

    /// Handler for names outside every configured origin
    pub fn with_next(mut self, next: Arc<dyn DnsHandler>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AutoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, zone: &str, rcode: ResponseCode) {
        if let Some(metrics) = &self.metrics {
            metrics.record_query(zone, rcode.as_str());
        }
    }

    fn serve_transfer(&self, request: &Request, zone: &Zone) -> Served {
        match self
            .transfer
            .serve(zone, &request.packet, request.client, request.protocol)
        {
            Ok(messages) => Served {
                rcode: ResponseCode::NoError,
                messages,
            },
            Err(e @ TransferError::NotAllowed(_)) => {
                Served::reply(DNSPacket::error_reply(&request.packet, e.rcode()))
            }
            Err(e) => {
                debug!("Malformed transfer request from {}: {}", request.client, e);
                Served::failure(e.rcode())
            }
        }
    }
}

#[async_trait]
impl DnsHandler for ZoneDispatcher {
    async fn serve(&self, request: &Request) -> Result<Served, HandlerError> {
        let query = &request.packet;
        let question = query.questions.first().ok_or(HandlerError::MissingQuestion)?;

        if question.qclass != DNSResourceClass::IN {
            return Err(HandlerError::UnsupportedClass(question.qclass.into()));
        }

        let qname = question.qname();
        if !self.table.covers(&qname) {
            return match &self.next {
                Some(next) => {
                    trace!("{} is outside our origins, passing on", qname);
                    next.serve(request).await
                }
                None => Err(HandlerError::NoNextHandler(qname)),
            };
        }

        if query.header.opcode != Opcode::Query as u8 {
            self.record("", ResponseCode::NotImplemented);
            return Ok(Served::failure(ResponseCode::NotImplemented));
        }

        let Some(zone) = self.table.find_zone(&qname) else {
            debug!("No zone loaded for {}", qname);
            self.record("", ResponseCode::ServerFailure);
            return Err(HandlerError::ZoneUnavailable(qname));
        };

        if question.qtype.is_transfer() {
            let served = self.serve_transfer(request, &zone);
            self.record(&zone.origin, served.rcode);
            return Ok(served);
        }

        let lookup = zone.lookup(&qname, question.qtype);

        let mut response = DNSPacket::reply_to(query);
        response.header.aa = true;
        response.header.ra = true;
        response.compress = true;
        response.answers = lookup.answer;
        response.authorities = lookup.authority;
        response.resources = lookup.additional;

        let rcode = match lookup.result {
            LookupResult::Success | LookupResult::NoData => ResponseCode::NoError,
            LookupResult::NameError => ResponseCode::NameError,
            LookupResult::Delegation => {
                response.header.aa = false;
                ResponseCode::NoError
            }
            LookupResult::ServerFailure => {
                warn!("Zone {} cannot answer {}", zone.origin, qname);
                self.record(&zone.origin, ResponseCode::ServerFailure);
                return Ok(Served::failure(ResponseCode::ServerFailure));
            }
        };
        response.header.rcode = rcode.to_u8();

        if let Some(edns) = &query.edns {
            response.edns = Some(edns.for_response());
        }

        let max_size = request.protocol.max_response_size(query);
        let truncated = response
            .fit_to(max_size)
            .map_err(|e| HandlerError::Encode(e.to_string()))?;
        if truncated && let Some(metrics) = &self.metrics {
            metrics.record_truncated_response(request.protocol.as_str());
        }

        self.record(&zone.origin, rcode);
        Ok(Served::reply(response))
    }
}
