//! Address lookups for names outside the served zones.
//!
//! Zone builds use a [`NameResolver`] to find addresses of name servers
//! that live outside the zone. A failed lookup only omits that glue.

use crate::dns::DNSPacket;
use crate::dns::enums::{DNSResourceClass, DNSResourceType, ResponseCode};
use crate::dns::name;
use crate::dns::question::DNSQuestion;
use crate::dns::resource::DNSResource;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Upstream query timeout")]
    Timeout,

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Upstream answered {0}")]
    Rcode(String),

    #[error("No upstream servers configured")]
    NoUpstream,
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Io(err.to_string())
    }
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// A and AAAA records for `name`, owned by `name`
    async fn resolve(&self, name: &str) -> Result<Vec<DNSResource>, ResolveError>;
}

/// Resolver that asks upstream servers over UDP
pub struct UpstreamResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
}

impl UpstreamResolver {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    async fn query_type(
        &self,
        target: &str,
        rtype: DNSResourceType,
    ) -> Result<Vec<DNSResource>, ResolveError> {
        let mut last_error = ResolveError::NoUpstream;

        for server in &self.servers {
            match self.query_upstream(target, rtype, *server).await {
                Ok(records) => return Ok(records),
                Err(e) => {
                    debug!(
                        "Upstream {} failed for {} {}: {}",
                        server,
                        target,
                        rtype.mnemonic(),
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn query_upstream(
        &self,
        target: &str,
        rtype: DNSResourceType,
        server: SocketAddr,
    ) -> Result<Vec<DNSResource>, ResolveError> {
        let mut query = DNSPacket::query(
            rand::random(),
            DNSQuestion::new(target, rtype, DNSResourceClass::IN),
        );
        query.header.rd = true;
        let query_bytes = query
            .serialize()
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;

        let bind_addr = if server.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;

        trace!("Sending {} bytes to upstream {}", query_bytes.len(), server);
        let response = timeout(
            self.timeout,
            exchange(&socket, &query_bytes, query.header.id, server),
        )
        .await
        .map_err(|_| ResolveError::Timeout)??;

        match response.rcode() {
            Some(ResponseCode::NoError) => {}
            Some(rcode) => return Err(ResolveError::Rcode(rcode.as_str().to_string())),
            None => return Err(ResolveError::Rcode(format!("rcode {}", response.header.rcode))),
        }

        // Aliases are flattened onto the name that was asked for
        Ok(response
            .answers
            .iter()
            .filter(|r| r.rtype == rtype)
            .map(|r| r.with_owner(target))
            .collect())
    }
}

/// Send one query and wait for the reply carrying the same id
async fn exchange(
    socket: &UdpSocket,
    query_bytes: &[u8],
    id: u16,
    server: SocketAddr,
) -> Result<DNSPacket, ResolveError> {
    socket.send(query_bytes).await?;
    let mut response_buf = vec![0u8; 4096];

    loop {
        let len = socket.recv(&mut response_buf).await?;
        let response = DNSPacket::parse(&response_buf[..len])
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        if response.header.id == id {
            return Ok(response);
        }
        trace!("Ignoring response with mismatched id from {}", server);
    }
}

#[async_trait]
impl NameResolver for UpstreamResolver {
    async fn resolve(&self, target: &str) -> Result<Vec<DNSResource>, ResolveError> {
        if self.servers.is_empty() {
            return Err(ResolveError::NoUpstream);
        }

        let target = name::fqdn(target);
        let (v4, v6) = tokio::join!(
            self.query_type(&target, DNSResourceType::A),
            self.query_type(&target, DNSResourceType::AAAA)
        );

        match (v4, v6) {
            (Err(e), Err(_)) => Err(e),
            (v4, v6) => {
                let mut records = v4.unwrap_or_default();
                records.extend(v6.unwrap_or_default());
                debug!("Resolved {} to {} addresses", target, records.len());
                Ok(records)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_upstream() {
        let resolver = UpstreamResolver::new(Vec::new(), Duration::from_millis(100));
        assert_eq!(
            resolver.resolve("ns.example.net.").await,
            Err(ResolveError::NoUpstream)
        );
    }

    #[tokio::test]
    async fn test_answers_from_upstream() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            for _ in 0..2 {
                let (len, peer) = upstream.recv_from(&mut buf).await.unwrap();
                let query = DNSPacket::parse(&buf[..len]).unwrap();
                let mut reply = DNSPacket::reply_to(&query);
                if query.questions[0].qtype == DNSResourceType::A {
                    reply.answers.push(DNSResource::new(
                        "ns.example.net.",
                        DNSResourceType::A,
                        DNSResourceClass::IN,
                        60,
                        vec![198, 51, 100, 7],
                    ));
                }
                upstream
                    .send_to(&reply.serialize().unwrap(), peer)
                    .await
                    .unwrap();
            }
        });

        let resolver = UpstreamResolver::new(vec![upstream_addr], Duration::from_secs(2));
        let records = resolver.resolve("NS.example.net").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner(), "ns.example.net.");
        assert_eq!(records[0].rdata_text(), "198.51.100.7");
    }
}
