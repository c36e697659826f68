//! Fire-and-forget UDP transport
//!
//! One unacknowledged datagram per dispatch cycle. A failed send is logged
//! and dropped; the next cycle supersedes it.

use std::io;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Transport setup errors. Send-time failures never surface as errors.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Failed to bind UDP socket: {0}")]
    Bind(#[from] io::Error),
}

pub struct PacketSender {
    socket: UdpSocket,
    target: String,
}

impl PacketSender {
    pub async fn new(ip: &str, port: u16) -> Result<Self, SendError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: format!("{ip}:{port}"),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send one datagram. Never fails; errors are logged and the packet is
    /// dropped.
    pub async fn send(&self, packet: &[u8]) {
        if let Err(e) = self.socket.send_to(packet, self.target.as_str()).await {
            log::warn!("UDP send to {} failed: {e}", self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_one_datagram_per_send() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sender = PacketSender::new("127.0.0.1", port).await.unwrap();
        let packet = [0xAA, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0x55];
        sender.send(&packet).await;

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("datagram should arrive")
            .unwrap();

        assert_eq!(n, packet.len());
        assert_eq!(&buf[..n], &packet);
    }

    #[tokio::test]
    async fn unreachable_target_does_not_error() {
        // Send failures are absorbed; this must simply not panic.
        let sender = PacketSender::new("127.0.0.1", 1).await.unwrap();
        sender.send(&[0u8; 12]).await;
    }
}
