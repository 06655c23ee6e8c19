//! Remote PC power control: Wake-on-LAN and HTTP shutdown

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::config::Settings;

/// Default Wake-on-LAN destination: limited broadcast, discard port
pub const WOL_BROADCAST: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, 9));

/// Errors from power control
#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("wake-on-lan send failed: {0}")]
    Broadcast(#[from] std::io::Error),

    #[error("shutdown request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl FromStr for MacAddress {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PowerError::InvalidMac(s.to_string());
        let hex: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() != 12 || !hex.is_ascii() {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl MacAddress {
    /// Six `0xFF` bytes followed by the address repeated sixteen times
    pub fn magic_packet(&self) -> [u8; 102] {
        let mut packet = [0xFFu8; 102];
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.0);
        }
        packet
    }
}

/// Talks to the PC named in the settings
#[derive(Debug, Clone)]
pub struct PowerControl {
    client: reqwest::Client,
    server_address: String,
    credential: String,
    mac: String,
    wol_target: SocketAddr,
}

impl PowerControl {
    /// `timeout` bounds both connecting and reading the shutdown response
    pub fn new(settings: &Settings, timeout: Duration) -> Result<Self, PowerError> {
        // The PC sits on the local network; never route through a proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            server_address: settings.server_address.clone(),
            credential: settings.server_password.clone(),
            mac: settings.pc_mac_address.clone(),
            wol_target: WOL_BROADCAST,
        })
    }

    /// Send magic packets somewhere other than the broadcast address
    #[cfg(test)]
    pub fn with_wol_target(mut self, target: SocketAddr) -> Self {
        self.wol_target = target;
        self
    }

    fn shutdown_url(&self) -> String {
        format!("http://{}/shutdown", self.server_address)
    }

    /// Broadcast a Wake-on-LAN magic packet
    pub async fn wake(&self) -> Result<(), PowerError> {
        let mac: MacAddress = self.mac.parse()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let sent = socket.send_to(&mac.magic_packet(), self.wol_target).await?;
        debug!(bytes = sent, target = %self.wol_target, "magic packet sent");
        Ok(())
    }

    /// Ask the PC to shut down; any HTTP response means it was reached
    pub async fn shutdown(&self) -> Result<(), PowerError> {
        let mut request = self.client.get(self.shutdown_url());
        if !self.credential.is_empty() {
            request = request.bearer_auth(&self.credential);
        }
        let response = request.send().await?;
        info!(status = %response.status(), "shutdown request answered");
        Ok(())
    }
}
