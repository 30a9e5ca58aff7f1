//! Packet transport.
//!
//! This module contains the [`PacketTransport`] trait, which is the only way
//! in which the rest of the crate talks to a board, and [`UdpTransport`], an
//! implementation that exchanges UDP datagrams with a board packet bridge.
//!
//! A transport sends byte buffers and, when a reply is expected, waits for
//! exactly one reply buffer of a known length within a deadline. Transports do
//! not retry.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Packet transport to a board.
#[allow(async_fn_in_trait)]
pub trait PacketTransport {
    /// Sends a packet.
    async fn send(&mut self, packet: &[u8]) -> Result<()>;

    /// Receives one reply packet of `len` bytes.
    ///
    /// Fails with [`Error::Timeout`] if no reply arrives before `deadline` and
    /// with [`Error::MalformedReply`] if the reply has a different length.
    async fn receive(&mut self, len: usize, deadline: Duration) -> Result<Bytes>;

    /// Sends a packet and receives its reply.
    async fn request(&mut self, packet: &[u8], len: usize, deadline: Duration) -> Result<Bytes> {
        self.send(packet).await?;
        self.receive(len, deadline).await
    }
}

/// UDP packet transport.
///
/// Each packet is sent as one datagram to the board packet bridge, and each
/// datagram received from the bridge is one reply.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

// larger than any reply, so that long replies are detected
const RECV_BUFFER_LEN: usize = 2048;

impl UdpTransport {
    /// Opens a transport to the packet bridge at `address` (`host:port`).
    #[tracing::instrument(name = "UdpTransport::connect", level = "debug")]
    pub async fn connect(address: &str) -> Result<UdpTransport> {
        let peer = tokio::net::lookup_host(address)
            .await?
            .next()
            .ok_or_else(|| Error::configuration(format!("could not resolve {address}")))?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        tracing::info!(%peer, "opened UDP transport");
        Ok(UdpTransport { socket, peer })
    }

    /// Gives the address of the packet bridge.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl PacketTransport for UdpTransport {
    async fn send(&mut self, packet: &[u8]) -> Result<()> {
        tracing::trace!(len = packet.len(), peer = %self.peer, "sending packet");
        self.socket.send(packet).await?;
        Ok(())
    }

    async fn receive(&mut self, len: usize, deadline: Duration) -> Result<Bytes> {
        let mut buffer = vec![0; RECV_BUFFER_LEN.max(len + 1)];
        let received = tokio::time::timeout(deadline, self.socket.recv(&mut buffer))
            .await
            .map_err(|_| Error::Timeout { timeout: deadline })??;
        buffer.truncate(received);
        if received != len {
            return Err(Error::MalformedReply {
                expected: len,
                raw: buffer,
            });
        }
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn pair() -> (UdpTransport, UdpSocket) {
        let bridge = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = bridge.local_addr().unwrap().to_string();
        let transport = UdpTransport::connect(&address).await.unwrap();
        bridge
            .connect(transport.socket.local_addr().unwrap())
            .await
            .unwrap();
        (transport, bridge)
    }

    #[tokio::test]
    async fn request_reply() {
        let (mut transport, bridge) = pair().await;
        let responder = async {
            let mut buf = [0; 64];
            let n = bridge.recv(&mut buf).await.unwrap();
            assert_eq!(n, 56);
            bridge.send(&[7; 70]).await.unwrap();
        };
        let (reply, ()) = tokio::join!(
            transport.request(&[0; 56], 70, Duration::from_secs(5)),
            responder
        );
        assert_eq!(reply.unwrap(), Bytes::from_static(&[7; 70]));
    }

    #[tokio::test]
    async fn timeout() {
        let (mut transport, _bridge) = pair().await;
        let err = transport
            .receive(70, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn wrong_length() {
        let (mut transport, bridge) = pair().await;
        bridge.send(&[1, 2, 3]).await.unwrap();
        match transport.receive(70, Duration::from_secs(5)).await {
            Err(Error::MalformedReply { expected, raw }) => {
                assert_eq!(expected, 70);
                assert_eq!(raw, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
