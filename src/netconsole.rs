//! The NetConsole: an out-of-band UDP broadcast channel carrying diagnostic
//! text from (and to) the robot.

use std::future::pending;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::net::UdpSocket;
use tokio_util::codec::BytesCodec;
use tokio_util::udp::UdpFramed;
use tracing::{trace, warn};

pub(crate) struct NetConsole {
    input_port: Option<u16>,
    output_port: Option<u16>,
    receiver: Option<UdpFramed<BytesCodec>>,
    sender: Option<UdpSocket>,
}

impl NetConsole {
    pub(crate) const fn new() -> NetConsole {
        NetConsole {
            input_port: None,
            output_port: None,
            receiver: None,
            sender: None,
        }
    }

    /// Rebinds the input socket to `port`, or closes it when `None`.
    pub(crate) async fn set_input_port(&mut self, port: Option<u16>) {
        self.input_port = port;
        self.receiver = None;

        if let Some(port) = port {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(socket) => {
                    self.receiver = Some(UdpFramed::new(socket, BytesCodec::new()));
                    trace!("NetConsole input bound to port {}", port);
                }
                Err(e) => warn!("failed to bind NetConsole input port {}: {}", port, e),
            }
        }
    }

    pub(crate) async fn set_output_port(&mut self, port: Option<u16>) {
        self.output_port = port;
        self.sender = None;

        if port.is_some() {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
                Ok(socket) => {
                    let _ = socket.set_broadcast(true);
                    self.sender = Some(socket);
                }
                Err(e) => warn!("failed to bind NetConsole output socket: {}", e),
            }
        }
    }

    /// Broadcasts `message` to the robot. No framing, no retry.
    pub(crate) async fn send_message(&self, message: &str) {
        let (Some(sender), Some(port)) = (&self.sender, self.output_port) else {
            return;
        };

        if !message.is_empty() {
            let target = SocketAddr::from((Ipv4Addr::BROADCAST, port));
            if let Err(e) = sender.send_to(message.as_bytes(), target).await {
                trace!("NetConsole send failed: {}", e);
            }
        }
    }

    /// Completes with the next broadcasted robot message. Pends forever while
    /// the input socket is closed.
    pub(crate) async fn recv(&mut self) -> String {
        let Some(receiver) = &mut self.receiver else {
            return pending().await;
        };

        loop {
            match receiver.next().await {
                Some(Ok((data, _))) => return decode_message(&data),
                Some(Err(e)) => trace!("NetConsole receive error: {}", e),
                None => return pending().await,
            }
        }
    }
}

fn decode_message(data: &BytesMut) -> String {
    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_decode_lossily() {
        let data = BytesMut::from(&b"[phoenix] initialized\n"[..]);
        assert_eq!(decode_message(&data), "[phoenix] initialized\n");

        let data = BytesMut::from(&[0x68, 0x69, 0xff][..]);
        assert_eq!(decode_message(&data), "hi\u{fffd}");
    }

    #[tokio::test]
    async fn roundtrip_over_loopback() {
        let mut console = NetConsole::new();
        console.set_input_port(Some(0)).await;

        // Recover the ephemeral port the receiver actually bound to.
        let port = console
            .receiver
            .as_ref()
            .unwrap()
            .get_ref()
            .local_addr()
            .unwrap()
            .port();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"robot says hi", ("127.0.0.1", port))
            .await
            .unwrap();

        assert_eq!(console.recv().await, "robot says hi");
    }
}
