use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use mac_address::MacAddress;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::WolConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// 6-byte sync stream plus the target MAC repeated 16 times.
const MAGIC_PACKET_LEN: usize = 102;

/// One row of the neighbor-table snapshot. Recomputed on every scan,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ArpEntry {
    pub mac: MacAddress,
    pub ip: IpAddr,
    pub name: Option<String>,
}

/// The three network operations the adapter needs, behind a seam so tests
/// can script them.
#[async_trait]
pub trait NetProbe: Send + Sync {
    async fn scan_arp_table(&self) -> Vec<ArpEntry>;
    async fn probe_reachable(&self, ip: IpAddr) -> bool;
    async fn send_wake(&self, mac: &MacAddress) -> io::Result<()>;
}

/// Production probe: shells out for the neighbor table, ICMP for
/// reachability, UDP broadcast for wake.
pub struct LanProbe {
    broadcast: Ipv4Addr,
    port: u16,
}

impl LanProbe {
    pub fn new(config: &WolConfig) -> Self {
        LanProbe {
            broadcast: config.broadcast,
            port: config.port,
        }
    }
}

#[async_trait]
impl NetProbe for LanProbe {
    async fn scan_arp_table(&self) -> Vec<ArpEntry> {
        scan_arp_table().await
    }

    async fn probe_reachable(&self, ip: IpAddr) -> bool {
        probe_reachable(ip).await
    }

    async fn send_wake(&self, mac: &MacAddress) -> io::Result<()> {
        send_wake(mac, self.broadcast, self.port).await
    }
}

/// Snapshot the OS neighbor table. `ip neigh` is preferred, `arp -a` is the
/// fallback for systems without iproute2. Any failure degrades to an empty
/// snapshot so callers treat the LAN as empty rather than crashing.
pub async fn scan_arp_table() -> Vec<ArpEntry> {
    if let Some(output) = neighbor_output("ip", &["neigh", "show"]).await {
        return parse_ip_neigh(&output);
    }
    if let Some(output) = neighbor_output("arp", &["-a"]).await {
        return parse_arp_a(&output);
    }
    warn!("ARP scan failed: no neighbor table source available");
    Vec::new()
}

async fn neighbor_output(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            debug!("{} exited with {}", program, output.status);
            None
        }
        Err(err) => {
            debug!("failed to run {}: {}", program, err);
            None
        }
    }
}

/// `192.168.1.5 dev eth0 lladdr aa:bb:cc:dd:ee:01 REACHABLE`
/// Rows without a link-layer address (FAILED, INCOMPLETE) are skipped.
fn parse_ip_neigh(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let ip: IpAddr = tokens.next()?.parse().ok()?;
            let mut tokens = tokens.skip_while(|t| *t != "lladdr");
            tokens.next()?;
            let mac: MacAddress = tokens.next()?.parse().ok()?;
            Some(ArpEntry { mac, ip, name: None })
        })
        .collect()
}

/// `router.lan (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0`
/// A name of `?` means the resolver had nothing; `<incomplete>` entries
/// fail MAC parsing and are skipped.
fn parse_arp_a(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.next()?;
            let ip: IpAddr = tokens
                .next()?
                .strip_prefix('(')?
                .strip_suffix(')')?
                .parse()
                .ok()?;
            if tokens.next()? != "at" {
                return None;
            }
            let mac: MacAddress = tokens.next()?.parse().ok()?;
            let name = (name != "?").then(|| name.to_string());
            Some(ArpEntry { mac, ip, name })
        })
        .collect()
}

/// One ICMP echo with a bounded timeout. Any failure reads as "not alive";
/// this must never propagate, the polling loop depends on it.
pub async fn probe_reachable(ip: IpAddr) -> bool {
    let payload = [0u8; 8];
    match timeout(PROBE_TIMEOUT, surge_ping::ping(ip, &payload)).await {
        Ok(Ok((_packet, latency))) => {
            debug!("{} answered in {:?}", ip, latency);
            true
        }
        Ok(Err(err)) => {
            debug!("probe of {} failed: {}", ip, err);
            false
        }
        Err(_) => {
            debug!("probe of {} timed out", ip);
            false
        }
    }
}

pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    let bytes = mac.bytes();
    for repeat in packet[6..].chunks_exact_mut(6) {
        repeat.copy_from_slice(&bytes);
    }
    packet
}

/// Broadcast a WoL magic packet for `mac`. A short send counts as a
/// transport failure.
pub async fn send_wake(mac: &MacAddress, broadcast: Ipv4Addr, port: u16) -> io::Result<()> {
    let packet = magic_packet(mac);
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    let sent = socket
        .send_to(&packet, SocketAddr::from((broadcast, port)))
        .await?;
    if sent != packet.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short magic packet send: {} of {} bytes", sent, packet.len()),
        ));
    }
    debug!("sent magic packet for {} to {}:{}", mac, broadcast, port);
    Ok(())
}
