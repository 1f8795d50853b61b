use crate::{
    dispatch::{DnsHandler, Protocol, Request, respond},
    dns::{DNSPacket, MAX_TCP_MESSAGE_SIZE},
    metrics::AutoMetrics,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Idle time after which a TCP connection is closed
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest UDP datagram read from clients
const UDP_RECV_BUFFER: usize = 4096;

type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Run UDP server with graceful shutdown support
pub async fn run_udp_server(
    bind_addr: SocketAddr,
    handler: Arc<dyn DnsHandler>,
    metrics: Option<Arc<AutoMetrics>>,
    shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let sock = UdpSocket::bind(bind_addr).await?;
    info!("UDP DNS server listening on {}", bind_addr);
    serve_udp(sock, handler, metrics, shutdown_rx).await
}

/// Answer queries arriving on an already bound socket
pub async fn serve_udp(
    sock: UdpSocket,
    handler: Arc<dyn DnsHandler>,
    metrics: Option<Arc<AutoMetrics>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let sock = Arc::new(sock);
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server received shutdown signal");
                break;
            }

            result = sock.recv_from(&mut buf) => {
                let (read_bytes, src_addr) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier sends surface here
                        debug!("UDP receive error: {}", e);
                        continue;
                    }
                };

                let Some(packet) = parse_query(&buf[..read_bytes], src_addr) else {
                    continue;
                };

                let handler = handler.clone();
                let metrics = metrics.clone();
                let sock = sock.clone();

                tokio::spawn(async move {
                    let started = Instant::now();
                    let request = Request::new(packet, src_addr, Protocol::Udp);
                    let messages = respond(handler.as_ref(), &request).await;

                    // Datagram transports carry a single message
                    if let Some(message) = messages.first() {
                        match message.serialize() {
                            Ok(bytes) => {
                                if let Err(e) = sock.send_to(&bytes, src_addr).await {
                                    error!("Failed to send UDP response to {}: {:?}", src_addr, e);
                                }
                            }
                            Err(e) => error!("Failed to serialize response: {:?}", e),
                        }
                    }

                    if let Some(metrics) = metrics {
                        metrics.record_query_duration(Protocol::Udp.as_str(), started.elapsed());
                    }
                });
            }
        }
    }

    info!("UDP server shutdown complete");
    Ok(())
}

/// Run TCP server with graceful shutdown support
pub async fn run_tcp_server(
    bind_addr: SocketAddr,
    handler: Arc<dyn DnsHandler>,
    metrics: Option<Arc<AutoMetrics>>,
    shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("TCP DNS server listening on {}", bind_addr);
    serve_tcp(listener, handler, metrics, shutdown_rx).await
}

/// Accept connections on an already bound listener
pub async fn serve_tcp(
    listener: TcpListener,
    handler: Arc<dyn DnsHandler>,
    metrics: Option<Arc<AutoMetrics>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server received shutdown signal");
                break;
            }

            result = listener.accept() => {
                let (stream, src_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept TCP connection: {}", e);
                        continue;
                    }
                };
                let handler = handler.clone();
                let metrics = metrics.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_connection(stream, src_addr, handler, metrics).await {
                        debug!("TCP connection error from {}: {:?}", src_addr, e);
                    }
                });
            }
        }
    }

    info!("TCP server shutdown complete");
    Ok(())
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    handler: Arc<dyn DnsHandler>,
    metrics: Option<Arc<AutoMetrics>>,
) -> ServerResult {
    let mut length_buf = [0u8; 2];

    loop {
        match tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_exact(&mut length_buf)).await {
            Err(_) => {
                trace!("TCP connection from {} idle, closing", src_addr);
                break;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection closed by client {}", src_addr);
                break;
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0u8; message_length];
        stream.read_exact(&mut message_buf).await?;

        let Some(packet) = parse_query(&message_buf, src_addr) else {
            break;
        };

        let started = Instant::now();
        let request = Request::new(packet, src_addr, Protocol::Tcp);
        let messages = respond(handler.as_ref(), &request).await;

        for message in &messages {
            let response_data = message.serialize()?;
            if response_data.len() > MAX_TCP_MESSAGE_SIZE {
                error!(
                    "Response of {} bytes to {} exceeds the TCP limit",
                    response_data.len(),
                    src_addr
                );
                break;
            }
            let response_length = response_data.len() as u16;
            stream.write_all(&response_length.to_be_bytes()).await?;
            stream.write_all(&response_data).await?;
        }
        stream.flush().await?;

        if let Some(metrics) = &metrics {
            metrics.record_query_duration(Protocol::Tcp.as_str(), started.elapsed());
        }
    }

    Ok(())
}

/// Decode a query, dropping malformed packets and stray responses
fn parse_query(buf: &[u8], src_addr: SocketAddr) -> Option<DNSPacket> {
    match DNSPacket::parse(buf) {
        Ok(packet) if packet.header.qr => {
            debug!("Received DNS response instead of query from {}", src_addr);
            None
        }
        Ok(packet) => Some(packet),
        Err(e) => {
            debug!("Malformed packet from {}: {}", src_addr, e);
            None
        }
    }
}
