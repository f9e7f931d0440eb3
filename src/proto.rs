//! The protocol engine: the [`Protocol`] trait, the per-year codec
//! implementations and the packet accounting shared by all of them.
//!
//! A protocol is behavior, not data. It exposes the constants of one
//! competition season (packet rates, ports, joystick limits, default
//! addresses) and the codec operations, plus a small amount of one-shot
//! request state (reboot, restart code, send date/time). Counters live in
//! the [`Session`] wrapper so a protocol swap starts accounting from zero.

pub mod frc2014;
pub mod frc2015;
pub mod frc2016;

use bytes::Bytes;

use crate::config::{CommStatus, DsConfig};
use crate::joystick::JoystickCaps;
use crate::sockets::SocketType;

pub(crate) use self::session::Session;

pub use self::frc2014::Frc2014;
pub use self::frc2015::Frc2015;
pub use self::frc2016::Frc2016;

use crate::joystick::JoystickRegistry;

/// Per-direction packet accounting. Wire indices are the send counters
/// masked to 16 bits; the since-connect pair feeds the packet-loss meter and
/// restarts when robot communications are re-established.
#[derive(Debug, Default, Copy, Clone)]
pub struct Counters {
    pub(crate) sent_fms: u32,
    pub(crate) sent_radio: u32,
    pub(crate) sent_robot: u32,
    pub(crate) recv_fms: u32,
    pub(crate) recv_radio: u32,
    pub(crate) recv_robot: u32,
    pub(crate) sent_robot_since_connect: u32,
    pub(crate) recv_robot_since_connect: u32,
}

impl Counters {
    #[inline(always)]
    pub const fn sent_fms_packets(&self) -> u32 {
        self.sent_fms
    }

    #[inline(always)]
    pub const fn sent_radio_packets(&self) -> u32 {
        self.sent_radio
    }

    #[inline(always)]
    pub const fn sent_robot_packets(&self) -> u32 {
        self.sent_robot
    }

    #[inline(always)]
    pub const fn received_fms_packets(&self) -> u32 {
        self.recv_fms
    }

    #[inline(always)]
    pub const fn received_radio_packets(&self) -> u32 {
        self.recv_radio
    }

    #[inline(always)]
    pub const fn received_robot_packets(&self) -> u32 {
        self.recv_robot
    }

    /// Packets sent since the robot last answered. Counting from the
    /// reconnect keeps the packet-loss ratio honest; the scanning phase can
    /// send thousands of unanswered packets.
    #[inline(always)]
    pub const fn sent_robot_packets_since_connect(&self) -> u32 {
        self.sent_robot_since_connect
    }

    #[inline(always)]
    pub const fn received_robot_packets_since_connect(&self) -> u32 {
        self.recv_robot_since_connect
    }
}

/// The shipped protocol versions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolKind {
    Frc2014,
    Frc2015,
    Frc2016,
}

impl ProtocolKind {
    pub(crate) fn create(self) -> Box<dyn Protocol> {
        match self {
            ProtocolKind::Frc2014 => Box::new(Frc2014::new()),
            ProtocolKind::Frc2015 => Box::new(Frc2015::new()),
            ProtocolKind::Frc2016 => Box::new(Frc2016::new()),
        }
    }
}

/// One season of the FRC communication protocol.
///
/// The default implementations describe a protocol that stays silent on
/// every channel; a concrete season overrides what it supports. Generation
/// and interpretation go through [`Session`], which maintains the packet
/// counters that the wire indices and the packet-loss meter are derived
/// from.
pub trait Protocol: Send {
    /// Display name of the protocol.
    fn name(&self) -> &'static str;

    /// Packets sent to the FMS per second.
    fn fms_frequency(&self) -> u32 {
        1
    }

    /// Packets sent to the radio per second.
    fn radio_frequency(&self) -> u32 {
        1
    }

    /// Packets sent to the robot per second.
    fn robot_frequency(&self) -> u32 {
        1
    }

    fn max_joystick_count(&self) -> usize {
        6
    }

    fn max_axis_count(&self) -> usize {
        12
    }

    fn max_button_count(&self) -> usize {
        24
    }

    fn max_pov_count(&self) -> usize {
        12
    }

    /// The joystick limits bundled up for the registry.
    fn joystick_caps(&self) -> JoystickCaps {
        JoystickCaps {
            joysticks: self.max_joystick_count(),
            axes: self.max_axis_count(),
            buttons: self.max_button_count(),
            povs: self.max_pov_count(),
        }
    }

    /// Local port on which FMS packets arrive, `None` when unsupported.
    fn fms_input_port(&self) -> Option<u16> {
        None
    }

    /// Remote port FMS packets are sent to.
    fn fms_output_port(&self) -> Option<u16> {
        None
    }

    fn radio_input_port(&self) -> Option<u16> {
        None
    }

    fn radio_output_port(&self) -> Option<u16> {
        None
    }

    fn robot_input_port(&self) -> Option<u16> {
        None
    }

    fn robot_output_port(&self) -> Option<u16> {
        None
    }

    fn netconsole_input_port(&self) -> Option<u16> {
        None
    }

    fn netconsole_output_port(&self) -> Option<u16> {
        None
    }

    /// TCP port probed to detect the radio, where the season defines one.
    fn tcp_probe_port(&self) -> Option<u16> {
        None
    }

    fn fms_socket_type(&self) -> SocketType {
        SocketType::Udp
    }

    fn radio_socket_type(&self) -> SocketType {
        SocketType::Udp
    }

    fn robot_socket_type(&self) -> SocketType {
        SocketType::Udp
    }

    /// Nominal battery voltage, for dashboard scaling.
    fn nominal_battery_voltage(&self) -> f32 {
        12.8
    }

    /// Nominal battery amperage, for dashboard scaling.
    fn nominal_battery_amperage(&self) -> f32 {
        17.0
    }

    /// Expected radio address for the given team.
    fn default_radio_address(&self, team: u16) -> String;

    /// Candidate robot addresses for the given team, most likely first.
    fn default_robot_addresses(&self, team: u16) -> Vec<String>;

    /// Requests a robot controller reboot with the next packet cycle.
    fn reboot_robot(&mut self);

    /// Requests a robot code restart with the next packet cycle.
    fn restart_robot_code(&mut self);

    fn on_fms_watchdog_expired(&mut self) {}

    fn on_radio_watchdog_expired(&mut self) {}

    /// Called when robot communications are lost. Implementations drop their
    /// one-shot request flags here so that a reconnecting robot is not
    /// greeted with a stale reboot command.
    fn on_robot_watchdog_expired(&mut self) {}

    fn fms_packet(&mut self, _counters: &Counters, _cfg: &DsConfig) -> Bytes {
        Bytes::new()
    }

    fn radio_packet(&mut self, _counters: &Counters, _cfg: &DsConfig) -> Bytes {
        Bytes::new()
    }

    fn robot_packet(
        &mut self,
        _counters: &Counters,
        _cfg: &DsConfig,
        _joysticks: &JoystickRegistry,
    ) -> Bytes {
        Bytes::new()
    }

    fn interpret_fms_packet(&mut self, _cfg: &mut DsConfig, _data: &[u8]) -> bool {
        false
    }

    fn interpret_radio_packet(&mut self, _cfg: &mut DsConfig, _data: &[u8]) -> bool {
        false
    }

    fn interpret_robot_packet(&mut self, _cfg: &mut DsConfig, _data: &[u8]) -> bool {
        false
    }
}

mod session {
    use super::*;

    /// An active protocol together with its packet counters. Swapping
    /// protocols replaces the whole session.
    pub(crate) struct Session {
        pub(crate) protocol: Box<dyn Protocol>,
        pub(crate) counters: Counters,
    }

    impl Session {
        pub(crate) fn new(protocol: Box<dyn Protocol>) -> Session {
            Session {
                protocol,
                counters: Counters::default(),
            }
        }

        pub(crate) fn generate_fms_packet(&mut self, cfg: &DsConfig) -> Bytes {
            self.counters.sent_fms = self.counters.sent_fms.wrapping_add(1);
            self.protocol.fms_packet(&self.counters, cfg)
        }

        pub(crate) fn generate_radio_packet(&mut self, cfg: &DsConfig) -> Bytes {
            self.counters.sent_radio = self.counters.sent_radio.wrapping_add(1);
            self.protocol.radio_packet(&self.counters, cfg)
        }

        pub(crate) fn generate_robot_packet(
            &mut self,
            cfg: &DsConfig,
            joysticks: &JoystickRegistry,
        ) -> Bytes {
            self.counters.sent_robot = self.counters.sent_robot.wrapping_add(1);
            self.counters.sent_robot_since_connect =
                self.counters.sent_robot_since_connect.wrapping_add(1);
            self.protocol.robot_packet(&self.counters, cfg, joysticks)
        }

        /// Interprets an FMS datagram. A clean parse marks FMS comms as
        /// working; a malformed one changes nothing.
        pub(crate) fn read_fms_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
            self.counters.recv_fms = self.counters.recv_fms.wrapping_add(1);

            let ok = self.protocol.interpret_fms_packet(cfg, data);
            if ok {
                cfg.set_fms_comm_status(CommStatus::Working);
            }
            ok
        }

        pub(crate) fn read_radio_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
            self.counters.recv_radio = self.counters.recv_radio.wrapping_add(1);

            let ok = self.protocol.interpret_radio_packet(cfg, data);
            if ok {
                cfg.set_radio_comm_status(CommStatus::Working);
            }
            ok
        }

        /// Interprets a robot datagram. The first clean parse after a
        /// communication loss restarts the since-connect accounting, so
        /// packet loss is not skewed by the packets sent while scanning.
        pub(crate) fn read_robot_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
            self.counters.recv_robot = self.counters.recv_robot.wrapping_add(1);

            let ok = self.protocol.interpret_robot_packet(cfg, data);
            if ok {
                if !cfg.is_connected_to_robot() {
                    self.counters.sent_robot_since_connect = 0;
                    self.counters.recv_robot_since_connect = 0;
                    cfg.set_robot_comm_status(CommStatus::Working);
                }
                self.counters.recv_robot_since_connect =
                    self.counters.recv_robot_since_connect.wrapping_add(1);
            }
            ok
        }

        /// Drops the received-side loss accounting. Called when the robot
        /// watchdog expires.
        pub(crate) fn reset_loss_counter(&mut self) {
            self.counters.recv_robot_since_connect = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::Event;
    use tokio::sync::mpsc::unbounded_channel;

    struct Permissive;

    impl Protocol for Permissive {
        fn name(&self) -> &'static str {
            "Permissive Protocol"
        }

        fn default_radio_address(&self, _team: u16) -> String {
            String::new()
        }

        fn default_robot_addresses(&self, _team: u16) -> Vec<String> {
            Vec::new()
        }

        fn reboot_robot(&mut self) {}

        fn restart_robot_code(&mut self) {}

        fn interpret_robot_packet(&mut self, _cfg: &mut DsConfig, data: &[u8]) -> bool {
            !data.is_empty()
        }
    }

    #[test]
    fn reconnect_resets_since_connect_counters() {
        let (tx, mut rx) = unbounded_channel();
        let mut cfg = DsConfig::new(tx);
        let joysticks = JoystickRegistry::new();
        let mut session = Session::new(Box::new(Permissive));

        for _ in 0..10 {
            session.generate_robot_packet(&cfg, &joysticks);
        }
        assert_eq!(session.counters.sent_robot, 10);
        assert_eq!(session.counters.sent_robot_since_connect, 10);

        // A malformed datagram changes nothing.
        assert!(!session.read_robot_packet(&mut cfg, &[]));
        assert!(!cfg.is_connected_to_robot());
        assert_eq!(session.counters.sent_robot_since_connect, 10);

        // The first clean parse restarts the since-connect accounting.
        assert!(session.read_robot_packet(&mut cfg, &[1]));
        assert!(cfg.is_connected_to_robot());
        assert_eq!(session.counters.sent_robot_since_connect, 0);
        assert_eq!(session.counters.recv_robot_since_connect, 1);
        assert_eq!(session.counters.recv_robot, 2);

        assert!(
            rx.try_recv()
                .is_ok_and(|e| e == Event::RobotCommStatusChanged(CommStatus::Working))
        );
    }
}
