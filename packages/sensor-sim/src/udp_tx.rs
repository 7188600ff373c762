//! Raw wire-format UDP packet sender.

use std::net::UdpSocket;

use tracing::warn;

pub struct UdpTransmitter {
    socket: UdpSocket,
    dest: String,
}

impl UdpTransmitter {
    pub fn new(dest: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            dest: dest.to_string(),
        })
    }

    /// Sends one already-encoded packet. Errors are logged and never panic —
    /// a generator dropping a packet on send failure is expected behaviour.
    pub fn send_packet(&self, packet: &[u8]) {
        if let Err(e) = self.socket.send_to(packet, &self.dest) {
            warn!(error = %e, "packet send failed");
        }
    }
}
