//! Outbound DNS NOTIFY (RFC 1996)
//!
//! When a reload publishes a zone with a newer serial, every configured
//! secondary is told about it. Each target gets its own socket and a
//! bounded wait for the acknowledgement; failures are logged and dropped.

use super::Zone;
use crate::dns::{
    DNSPacket,
    enums::{DNSResourceClass, DNSResourceType, Opcode, ResponseCode},
    question::DNSQuestion,
};
use crate::error::NotifyError;
use crate::metrics::AutoMetrics;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// Time allowed for a secondary to acknowledge
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends NOTIFY messages for changed zones
pub struct ZoneNotifier {
    targets: Vec<SocketAddr>,
    timeout: Duration,
    metrics: Option<Arc<AutoMetrics>>,
}

impl ZoneNotifier {
    pub fn new(targets: Vec<SocketAddr>) -> Self {
        Self {
            targets,
            timeout: NOTIFY_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AutoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// NOTIFY message for `zone`: SOA question, current SOA as answer
    pub fn notify_packet(zone: &Zone, id: u16) -> DNSPacket {
        let mut packet = DNSPacket::query(
            id,
            DNSQuestion::new(&zone.origin, DNSResourceType::SOA, DNSResourceClass::IN),
        );
        packet.header.opcode = Opcode::Notify as u8;
        packet.header.aa = true;
        packet.answers.push(zone.soa().clone());
        packet
    }

    /// Notify every target about `zone` concurrently.
    ///
    /// Returns the number of targets that acknowledged.
    pub async fn notify(&self, zone: &Zone) -> usize {
        if self.targets.is_empty() {
            return 0;
        }

        info!(
            "Sending NOTIFY for zone {} serial {} to {} servers",
            zone.origin,
            zone.serial,
            self.targets.len()
        );

        let sends = self.targets.iter().map(|target| {
            let packet = Self::notify_packet(zone, rand::random());
            async move {
                let result = send_notify(&packet, *target, self.timeout).await;
                (*target, result)
            }
        });

        let mut acknowledged = 0;
        for (target, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    debug!("NOTIFY for {} acknowledged by {}", zone.origin, target);
                    acknowledged += 1;
                    self.record("success");
                }
                Err(e) => {
                    warn!("NOTIFY for {} to {} failed: {}", zone.origin, target, e);
                    self.record("failure");
                }
            }
        }

        acknowledged
    }

    fn record(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_notify(result);
        }
    }
}

/// Deliver one NOTIFY and wait for the matching acknowledgement
async fn send_notify(
    packet: &DNSPacket,
    target: SocketAddr,
    wait: Duration,
) -> Result<(), NotifyError> {
    let bytes = packet
        .serialize()
        .map_err(|e| NotifyError::InvalidResponse(e.to_string()))?;

    let bind_addr = if target.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(target).await?;
    socket.send(&bytes).await?;

    let response = timeout(wait, await_ack(&socket, packet.header.id))
        .await
        .map_err(|_| NotifyError::Timeout(wait))??;

    match response.rcode() {
        Some(ResponseCode::NoError) => Ok(()),
        Some(rcode) => Err(NotifyError::Rcode(rcode.as_str().to_string())),
        None => Err(NotifyError::Rcode(format!("rcode {}", response.header.rcode))),
    }
}

async fn await_ack(socket: &UdpSocket, id: u16) -> Result<DNSPacket, NotifyError> {
    let mut buf = vec![0u8; 512];
    loop {
        let len = socket.recv(&mut buf).await?;
        let response = DNSPacket::parse(&buf[..len])
            .map_err(|e| NotifyError::InvalidResponse(e.to_string()))?;
        if response.header.id == id && response.header.qr {
            return Ok(response);
        }
    }
}
