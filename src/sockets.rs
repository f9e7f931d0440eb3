//! The transport layer: six logical endpoints (FMS, radio and robot, each
//! with an input and an output side) plus the robot address scanner.
//!
//! Until the robot is detected, outbound robot packets are fanned out to a
//! moving window of candidate addresses. The first datagram received on the
//! robot input port pins the sender to its source address and ends the scan.

use std::future::pending;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::net::UdpSocket;
use tokio_util::codec::BytesCodec;
use tokio_util::udp::UdpFramed;
use tracing::{debug, trace, warn};

/// Transport used for a channel. Every shipped protocol is UDP; the TCP
/// variant is accepted at the trait surface but its endpoints stay unbound.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SocketType {
    Udp,
    Tcp,
}

/// The peer a datagram belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Channel {
    Fms,
    Radio,
    Robot,
}

/// One received datagram, tagged with its channel and source.
#[derive(Debug)]
pub(crate) struct Datagram {
    pub(crate) channel: Channel,
    pub(crate) data: BytesMut,
    pub(crate) from: SocketAddr,
}

/// A sender/receiver pair for one peer.
struct Endpoint {
    socket_type: SocketType,
    input_port: Option<u16>,
    output_port: Option<u16>,
    receiver: Option<UdpFramed<BytesCodec>>,
    sender: Option<UdpSocket>,
}

impl Endpoint {
    const fn new() -> Endpoint {
        Endpoint {
            socket_type: SocketType::Udp,
            input_port: None,
            output_port: None,
            receiver: None,
            sender: None,
        }
    }

    /// Drops and recreates the sender/receiver pair. A failed bind leaves
    /// the side unbound until the next configuration change.
    async fn rebuild(&mut self) {
        self.receiver = None;
        self.sender = None;

        if self.socket_type != SocketType::Udp {
            return;
        }

        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => {
                let _ = socket.set_broadcast(true);
                self.sender = Some(socket);
            }
            Err(e) => warn!("failed to bind sender socket: {}", e),
        }

        if let Some(port) = self.input_port {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(socket) => {
                    self.receiver = Some(UdpFramed::new(socket, BytesCodec::new()));
                    debug!("receiver bound to port {}", port);
                }
                Err(e) => warn!("failed to bind receiver port {}: {}", port, e),
            }
        }
    }

    async fn set_socket_type(&mut self, socket_type: SocketType) {
        self.socket_type = socket_type;
        self.rebuild().await;
    }

    async fn set_input_port(&mut self, port: Option<u16>) {
        self.input_port = port;
        self.receiver = None;

        if self.socket_type != SocketType::Udp {
            return;
        }

        if let Some(port) = port {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(socket) => {
                    self.receiver = Some(UdpFramed::new(socket, BytesCodec::new()));
                    debug!("receiver bound to port {}", port);
                }
                Err(e) => warn!("failed to bind receiver port {}: {}", port, e),
            }
        }
    }

    fn set_output_port(&mut self, port: Option<u16>) {
        self.output_port = port;
    }

    /// Fire-and-forget datagram write; errors are traced and dropped.
    async fn send_to(&self, data: &[u8], host: &str, port: u16) {
        let Some(sender) = &self.sender else { return };

        // A literal address skips the resolver entirely.
        let result = match Ipv4Addr::from_str(host) {
            Ok(ip) => sender.send_to(data, SocketAddr::from((ip, port))).await,
            Err(_) => sender.send_to(data, (host, port)).await,
        };

        if let Err(e) = result {
            trace!("send to {}:{} failed: {}", host, port, e);
        }
    }

    /// Completes with the next datagram, pending forever while unbound.
    async fn recv(&mut self) -> (BytesMut, SocketAddr) {
        let Some(receiver) = &mut self.receiver else {
            return pending().await;
        };

        loop {
            match receiver.next().await {
                Some(Ok(datagram)) => return datagram,
                Some(Err(e)) => trace!("receive error: {}", e),
                None => return pending().await,
            }
        }
    }
}

/// The endpoint set, the candidate address list and the scan cursor.
pub(crate) struct Sockets {
    fms: Endpoint,
    radio: Endpoint,
    robot: Endpoint,
    fms_address: String,
    radio_address: String,
    robot_address: String,
    address_list: Vec<String>,
    iterator: usize,
    custom_scan_rate: usize,
}

impl Sockets {
    pub(crate) const fn new() -> Sockets {
        Sockets {
            fms: Endpoint::new(),
            radio: Endpoint::new(),
            robot: Endpoint::new(),
            fms_address: String::new(),
            radio_address: String::new(),
            robot_address: String::new(),
            address_list: Vec::new(),
            iterator: 0,
            custom_scan_rate: 0,
        }
    }

    /// Number of candidate addresses probed per robot tick. A user override
    /// wins; otherwise the rate scales with the size of the candidate list.
    pub(crate) fn scan_rate(&self) -> usize {
        if self.custom_scan_rate > 0 {
            self.custom_scan_rate
        } else {
            (self.address_list.len() / 6).clamp(1, 72)
        }
    }

    pub(crate) fn set_scan_rate(&mut self, rate: usize) {
        self.custom_scan_rate = rate;
        debug!("scan rate set to {}", rate);
    }

    /// Advances the scan cursor by one window. Called after every robot send
    /// tick, so scan speed follows the robot packet frequency.
    pub(crate) fn refresh_address_list(&mut self) {
        if self.robot_address.is_empty() && !self.address_list.is_empty() {
            if self.address_list.len() > self.iterator + self.scan_rate() {
                self.iterator += self.scan_rate();
            } else {
                self.iterator = 0;
            }
        }
    }

    /// Replaces the candidate list and extends it with every host of every
    /// locally reachable IPv4 /24, followed by the loopback address.
    pub(crate) fn set_address_list(&mut self, list: Vec<String>) {
        self.address_list = list;
        generate_local_network_addresses(&mut self.address_list);
        self.address_list.push("127.0.0.1".to_string());
        self.iterator = 0;
        debug!("scanning {} robot address candidates", self.address_list.len());
    }

    #[inline(always)]
    pub(crate) fn robot_address(&self) -> &str {
        &self.robot_address
    }

    /// Pins the robot sender to `address`, or engages scan mode when the
    /// address is empty.
    pub(crate) fn set_robot_address(&mut self, address: String) {
        if address.is_empty() {
            debug!("robot address cleared, scanning for the robot");
        } else {
            debug!("robot address set to {}", address);
        }
        self.robot_address = address;
        self.iterator = 0;
    }

    pub(crate) fn set_radio_address(&mut self, address: String) {
        self.radio_address = address;
    }

    pub(crate) fn set_fms_address(&mut self, address: String) {
        self.fms_address = address;
    }

    pub(crate) async fn set_fms_socket_type(&mut self, socket_type: SocketType) {
        self.fms.set_socket_type(socket_type).await;
    }

    pub(crate) async fn set_radio_socket_type(&mut self, socket_type: SocketType) {
        self.radio.set_socket_type(socket_type).await;
    }

    pub(crate) async fn set_robot_socket_type(&mut self, socket_type: SocketType) {
        self.robot.set_socket_type(socket_type).await;
    }

    pub(crate) async fn set_fms_input_port(&mut self, port: Option<u16>) {
        self.fms.set_input_port(port).await;
    }

    pub(crate) fn set_fms_output_port(&mut self, port: Option<u16>) {
        self.fms.set_output_port(port);
    }

    pub(crate) async fn set_radio_input_port(&mut self, port: Option<u16>) {
        self.radio.set_input_port(port).await;
    }

    pub(crate) fn set_radio_output_port(&mut self, port: Option<u16>) {
        self.radio.set_output_port(port);
    }

    pub(crate) async fn set_robot_input_port(&mut self, port: Option<u16>) {
        self.robot.set_input_port(port).await;
    }

    pub(crate) fn set_robot_output_port(&mut self, port: Option<u16>) {
        self.robot.set_output_port(port);
    }

    /// Sends `data` to the FMS. Without a known FMS address the datagram is
    /// broadcast on the local segment.
    pub(crate) async fn send_to_fms(&self, data: &[u8]) {
        let Some(port) = self.fms.output_port else {
            return;
        };

        if self.fms_address.is_empty() {
            self.fms
                .send_to(data, &Ipv4Addr::BROADCAST.to_string(), port)
                .await;
        } else {
            self.fms.send_to(data, &self.fms_address, port).await;
        }
    }

    pub(crate) async fn send_to_radio(&self, data: &[u8]) {
        let Some(port) = self.radio.output_port else {
            return;
        };

        if !self.radio_address.is_empty() {
            self.radio.send_to(data, &self.radio_address, port).await;
        }
    }

    /// Sends `data` to the robot: to the pinned peer once one is known,
    /// otherwise to the current window of the candidate list.
    pub(crate) async fn send_to_robot(&self, data: &[u8]) {
        let Some(port) = self.robot.output_port else {
            return;
        };

        if !self.robot_address.is_empty() {
            self.robot.send_to(data, &self.robot_address, port).await;
            return;
        }

        for i in 0..self.scan_rate() {
            let Some(candidate) = self.address_list.get(self.iterator + i) else {
                break;
            };

            // mDNS names in the candidate list are not probed; resolving a
            // hostname per candidate per tick would stall the send loop.
            if Ipv4Addr::from_str(candidate).is_ok() {
                self.robot.send_to(data, candidate, port).await;
            }
        }
    }

    /// Completes with the next datagram from any bound receiver. The robot
    /// receiver self-pins to the source of the first datagram it sees while
    /// in scan mode.
    pub(crate) async fn recv(&mut self) -> Datagram {
        let datagram = tokio::select! {
            (data, from) = self.fms.recv() => Datagram { channel: Channel::Fms, data, from },
            (data, from) = self.radio.recv() => Datagram { channel: Channel::Radio, data, from },
            (data, from) = self.robot.recv() => Datagram { channel: Channel::Robot, data, from },
        };

        if datagram.channel == Channel::Robot && self.robot_address.is_empty() {
            self.set_robot_address(datagram.from.ip().to_string());
        }

        datagram
    }
}

/// Appends every host address of every /24 the machine sits on. Scanning the
/// whole segment is more reliable than trusting mDNS or the default gateway,
/// and the window mechanism keeps the probe rate bounded.
fn generate_local_network_addresses(list: &mut Vec<String>) {
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return;
    };

    for interface in interfaces {
        if interface.is_loopback() {
            continue;
        }

        if let std::net::IpAddr::V4(ip) = interface.addr.ip() {
            let [a, b, c, _] = ip.octets();
            debug!("client IP detected: {}", ip);
            for host in 1..255 {
                list.push(format!("{}.{}.{}.{}", a, b, c, host));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scan_rate_scales_with_list_size() {
        let mut sockets = Sockets::new();
        assert_eq!(sockets.scan_rate(), 1);

        sockets.address_list = (0..60).map(|i| format!("10.0.0.{}", i)).collect();
        assert_eq!(sockets.scan_rate(), 10);

        sockets.address_list = (0..1000).map(|i| format!("10.0.{}.1", i)).collect();
        assert_eq!(sockets.scan_rate(), 72);

        sockets.set_scan_rate(5);
        assert_eq!(sockets.scan_rate(), 5);
    }

    #[test]
    fn scan_cursor_advances_and_wraps() {
        let mut sockets = Sockets::new();
        sockets.address_list = (0..25).map(|i| format!("10.0.0.{}", i)).collect();
        sockets.set_scan_rate(10);

        assert_eq!(sockets.iterator, 0);
        sockets.refresh_address_list();
        assert_eq!(sockets.iterator, 10);
        sockets.refresh_address_list();
        assert_eq!(sockets.iterator, 0);
    }

    #[test]
    fn pinned_address_freezes_the_cursor() {
        let mut sockets = Sockets::new();
        sockets.address_list = (0..25).map(|i| format!("10.0.0.{}", i)).collect();
        sockets.set_scan_rate(10);

        sockets.set_robot_address("10.0.0.7".to_string());
        sockets.refresh_address_list();
        assert_eq!(sockets.iterator, 0);
    }

    #[test]
    fn address_list_keeps_defaults_first_and_loopback_last() {
        let mut sockets = Sockets::new();
        sockets.set_address_list(vec![
            "roboRIO-3794-FRC.local".to_string(),
            "10.37.94.2".to_string(),
        ]);

        let list = &sockets.address_list;
        assert_eq!(list[0], "roboRIO-3794-FRC.local");
        assert_eq!(list[1], "10.37.94.2");
        assert_eq!(list.last().unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn robot_sends_reach_a_pinned_peer() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut sockets = Sockets::new();
        sockets.set_robot_socket_type(SocketType::Udp).await;
        sockets.set_robot_output_port(Some(port));
        sockets.set_robot_address("127.0.0.1".to_string());

        sockets.send_to_robot(b"ping").await;

        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
    }

    #[tokio::test]
    async fn scan_mode_probes_the_candidate_window() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut sockets = Sockets::new();
        sockets.set_robot_socket_type(SocketType::Udp).await;
        sockets.set_robot_output_port(Some(port));
        sockets.address_list = vec!["roboRIO-0.local".to_string(), "127.0.0.1".to_string()];
        sockets.set_scan_rate(2);

        sockets.send_to_robot(b"scan").await;
        sockets.refresh_address_list();

        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"scan");
    }

    #[tokio::test]
    async fn robot_receiver_self_pins() {
        let mut sockets = Sockets::new();
        sockets.set_robot_socket_type(SocketType::Udp).await;
        sockets.set_robot_input_port(Some(0)).await;

        let port = sockets
            .robot
            .receiver
            .as_ref()
            .unwrap()
            .get_ref()
            .local_addr()
            .unwrap()
            .port();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[0u8; 8], ("127.0.0.1", port)).await.unwrap();

        let datagram = sockets.recv().await;
        assert_eq!(datagram.channel, Channel::Robot);
        assert_eq!(sockets.robot_address(), "127.0.0.1");
    }
}
