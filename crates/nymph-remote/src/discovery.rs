//! UDP broadcast discovery of receivers and media servers.
//!
//! A single JSON probe is broadcast; every service of the requested kind
//! answers with its name and TCP port.  Answers are collected until the
//! listen window closes.  No answers is not an error.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use nymph_proto::protocol::{DiscoveryAnswer, DiscoveryProbe, RemoteDescriptor, Service};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub async fn scan(
    service: Service,
    port: u16,
    window: Duration,
) -> anyhow::Result<Vec<RemoteDescriptor>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let probe = serde_json::to_vec(&DiscoveryProbe { service })?;
    socket.send_to(&probe, (Ipv4Addr::BROADCAST, port)).await?;
    debug!("discovery: probe for {:?} sent to port {}", service, port);

    let remotes = collect_answers(&socket, service, window).await;
    info!("discovery: {} {:?} answer(s)", remotes.len(), service);
    Ok(remotes)
}

/// Read answers from `socket` until `window` elapses.
pub async fn collect_answers(
    socket: &UdpSocket,
    service: Service,
    window: Duration,
) -> Vec<RemoteDescriptor> {
    let deadline = tokio::time::Instant::now() + window;
    let mut remotes: Vec<RemoteDescriptor> = Vec::new();
    let mut buf = [0u8; 2048];

    loop {
        let recv = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (n, from) = match recv {
            Err(_) => break,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!("discovery: receive error: {}", e);
                break;
            }
        };

        match parse_answer(&buf[..n], from, service) {
            Some(remote) => {
                if !remotes.iter().any(|r| r.address() == remote.address()) {
                    remotes.push(remote);
                }
            }
            None => debug!("discovery: ignored datagram from {}", from),
        }
    }

    remotes.sort_by(|a, b| a.ipv4.cmp(&b.ipv4).then(a.port.cmp(&b.port)));
    remotes
}

fn parse_answer(data: &[u8], from: SocketAddr, service: Service) -> Option<RemoteDescriptor> {
    let answer: DiscoveryAnswer = serde_json::from_slice(data).ok()?;
    if answer.service != service {
        return None;
    }
    Some(RemoteDescriptor {
        name: answer.name,
        ipv4: from.ip().to_string(),
        port: answer.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn answer(to: SocketAddr, service: Service, name: &str, port: u16) {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let body = serde_json::to_vec(&DiscoveryAnswer {
            service,
            name: name.to_string(),
            port,
        })
        .unwrap();
        sock.send_to(&body, to).await.unwrap();
    }

    #[tokio::test]
    async fn test_collects_matching_answers_once() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        answer(addr, Service::Receiver, "kitchen", 4004).await;
        answer(addr, Service::Receiver, "kitchen", 4004).await;
        answer(addr, Service::MediaServer, "nas", 4005).await;
        listener.send_to(b"not json", addr).await.unwrap();

        let remotes =
            collect_answers(&listener, Service::Receiver, Duration::from_millis(200)).await;
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "kitchen");
        assert_eq!(remotes[0].ipv4, "127.0.0.1");
        assert_eq!(remotes[0].port, 4004);
    }

    #[tokio::test]
    async fn test_silence_yields_empty_list() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let remotes =
            collect_answers(&listener, Service::MediaServer, Duration::from_millis(50)).await;
        assert!(remotes.is_empty());
    }
}
