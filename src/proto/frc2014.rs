//! The 2009-2014 FRC communication protocol (cRIO era).
//!
//! Robot packets are a fixed 1024 bytes with a CRC-32 trailer, and joystick
//! values are encoded for every slot the protocol defines whether a stick is
//! attached or not. The robot replies in kind, with the battery voltage
//! encoded as BCD digit pairs.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tracing::trace;

use crate::config::{Alliance, ControlMode, DsConfig, Position};
use crate::joystick::JoystickRegistry;
use crate::proto::{Counters, Protocol};
use crate::util::ip_from_team;

const ESTOP_ON: u8 = 0x00;
const ESTOP_OFF: u8 = 0x40;
const REBOOT: u8 = 0x80;
const ENABLED: u8 = 0x20;
const RESYNC: u8 = 0x04;
const MODE_TELEOP: u8 = 0x00;
const MODE_AUTONOMOUS: u8 = 0x10;
const MODE_TEST: u8 = 0x02;
const FMS_ATTACHED: u8 = 0x08;

const ALLIANCE_RED: u8 = 0x52;
const ALLIANCE_BLUE: u8 = 0x42;
const POSITION_1: u8 = 0x31;
const POSITION_2: u8 = 0x32;
const POSITION_3: u8 = 0x33;

/// The robot code treats both voltage digit pairs reading 0x37 as "code not
/// running".
const NO_CODE_SENTINEL: u8 = 0x37;

const PACKET_SIZE: usize = 1024;
const JOYSTICK_OFFSET: usize = 8;
const JOYSTICK_SLOTS: usize = 8;
const SLOT_AXES: usize = 6;
const VERSION_OFFSET: usize = 72;
const CRC_OFFSET: usize = 1020;

/// Driver Station version advertised in the packet, matching the 16.0.1
/// official release.
const DS_VERSION: &[u8; 8] = b"04011600";

/// Implementation of the 2009-2014 season protocol.
pub struct Frc2014 {
    reboot: bool,
    resync: bool,
}

impl Frc2014 {
    pub fn new() -> Frc2014 {
        Frc2014 {
            reboot: false,
            resync: true,
        }
    }

    /// The operation code: enable + mode + flags, except that an emergency
    /// stop or a reboot request replaces the whole byte.
    fn operation_code(&self, cfg: &DsConfig) -> u8 {
        let mut code = ESTOP_OFF;

        if cfg.is_enabled() {
            code |= ENABLED;
        }

        code |= match cfg.control_mode() {
            ControlMode::Test => MODE_TEST,
            ControlMode::Autonomous => MODE_AUTONOMOUS,
            ControlMode::Teleoperated => MODE_TELEOP,
        };

        if self.resync {
            code |= RESYNC;
        }

        if cfg.is_connected_to_fms() {
            code |= FMS_ATTACHED;
        }

        if cfg.is_emergency_stopped() {
            code = ESTOP_ON;
        }

        if self.reboot {
            code = REBOOT;
        }

        code
    }

    fn alliance_byte(cfg: &DsConfig) -> u8 {
        match cfg.alliance() {
            Alliance::Red => ALLIANCE_RED,
            Alliance::Blue => ALLIANCE_BLUE,
        }
    }

    fn position_byte(cfg: &DsConfig) -> u8 {
        match cfg.position() {
            Position::Position1 => POSITION_1,
            Position::Position2 => POSITION_2,
            Position::Position3 => POSITION_3,
        }
    }

    /// Encodes every joystick slot the protocol defines. Detached slots
    /// carry neutral values.
    fn write_joystick_data(data: &mut [u8], joysticks: &JoystickRegistry) {
        let mut offset = JOYSTICK_OFFSET;

        for slot in 0..JOYSTICK_SLOTS {
            let stick = joysticks.get(slot);

            for axis in 0..SLOT_AXES {
                let value = stick
                    .and_then(|s| s.axes.get(axis))
                    .map_or(0i8, |&v| (v * 127.0) as i8);
                data[offset] = value as u8;
                offset += 1;
            }

            let mut buttons: u16 = 0;
            if let Some(stick) = stick {
                for (i, &pressed) in stick.buttons.iter().enumerate() {
                    if pressed {
                        buttons |= 1 << i;
                    }
                }
            }
            BigEndian::write_u16(&mut data[offset..offset + 2], buttons);
            offset += 2;
        }
    }
}

impl Default for Frc2014 {
    fn default() -> Frc2014 {
        Frc2014::new()
    }
}

impl Protocol for Frc2014 {
    fn name(&self) -> &'static str {
        "FRC 2014 Protocol"
    }

    fn fms_frequency(&self) -> u32 {
        2
    }

    fn robot_frequency(&self) -> u32 {
        50
    }

    fn fms_input_port(&self) -> Option<u16> {
        Some(1120)
    }

    fn fms_output_port(&self) -> Option<u16> {
        Some(1160)
    }

    fn robot_input_port(&self) -> Option<u16> {
        Some(1150)
    }

    fn robot_output_port(&self) -> Option<u16> {
        Some(1110)
    }

    fn tcp_probe_port(&self) -> Option<u16> {
        Some(80)
    }

    fn max_joystick_count(&self) -> usize {
        4
    }

    fn max_axis_count(&self) -> usize {
        6
    }

    fn max_button_count(&self) -> usize {
        12
    }

    fn max_pov_count(&self) -> usize {
        0
    }

    fn default_radio_address(&self, team: u16) -> String {
        ip_from_team(team, 1)
    }

    fn default_robot_addresses(&self, team: u16) -> Vec<String> {
        vec![ip_from_team(team, 2)]
    }

    fn reboot_robot(&mut self) {
        self.reboot = true;
    }

    /// A robot code restart is not expressible in the 2009-2014 wire format.
    fn restart_robot_code(&mut self) {}

    fn on_robot_watchdog_expired(&mut self) {
        self.reboot = false;
        self.resync = true;
    }

    fn robot_packet(
        &mut self,
        counters: &Counters,
        cfg: &DsConfig,
        joysticks: &JoystickRegistry,
    ) -> Bytes {
        let mut data = vec![0u8; PACKET_SIZE];

        BigEndian::write_u16(&mut data[0..2], (counters.sent_robot_packets() & 0xffff) as u16);
        data[2] = self.operation_code(cfg);
        data[3] = 0x00; // digital inputs, unused
        BigEndian::write_u16(&mut data[4..6], cfg.team());
        data[6] = Self::alliance_byte(cfg);
        data[7] = Self::position_byte(cfg);

        Self::write_joystick_data(&mut data, joysticks);

        data[VERSION_OFFSET..VERSION_OFFSET + DS_VERSION.len()].copy_from_slice(DS_VERSION);

        let checksum = crc32fast::hash(&data[..CRC_OFFSET]);
        BigEndian::write_u32(&mut data[CRC_OFFSET..], checksum);

        Bytes::from(data)
    }

    /// Extracts the emergency-stop echo, the code status and the BCD-encoded
    /// battery voltage from the robot's reply.
    fn interpret_robot_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
        if data.len() < PACKET_SIZE {
            trace!("{}: received invalid robot packet", self.name());
            return false;
        }

        let opcode = data[0];
        let integer = data[1];
        let decimal = data[2];

        if opcode == ESTOP_ON && !cfg.is_emergency_stopped() {
            cfg.set_emergency_stop(true);
        }

        let has_code = !(integer == NO_CODE_SENTINEL && decimal == NO_CODE_SENTINEL);
        cfg.set_robot_code(has_code);

        let voltage = if has_code {
            // The voltage is stored as BCD digit pairs: 0x12 0x70 reads as
            // "12.70".
            format!("{:02x}.{:02x}", integer, decimal)
                .parse()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        cfg.set_voltage(voltage);

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::OperationStatus;
    use crate::joystick::JoystickCaps;
    use crate::proto::Session;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn harness() -> (Session, DsConfig, JoystickRegistry, UnboundedReceiver<crate::Event>) {
        let (tx, rx) = unbounded_channel();
        (
            Session::new(Box::new(Frc2014::new())),
            DsConfig::new(tx),
            JoystickRegistry::new(),
            rx,
        )
    }

    #[test]
    fn crc_of_1020_zero_bytes_matches_the_reference_value() {
        assert_eq!(crc32fast::hash(&[0u8; 1020]), 0x67bb_af86);
    }

    #[test]
    fn robot_packet_layout() {
        let (mut session, mut cfg, joysticks, _rx) = harness();
        cfg.set_team(3794);
        cfg.set_alliance(Alliance::Blue);
        cfg.set_position(Position::Position3);

        let packet = session.generate_robot_packet(&cfg, &joysticks);

        assert_eq!(packet.len(), PACKET_SIZE);
        assert_eq!(&packet[0..2], &[0x00, 0x01]);
        assert_eq!(packet[2], ESTOP_OFF | RESYNC);
        assert_eq!(&packet[4..6], &[0x0e, 0xd2]);
        assert_eq!(packet[6], ALLIANCE_BLUE);
        assert_eq!(packet[7], POSITION_3);
        assert_eq!(&packet[VERSION_OFFSET..VERSION_OFFSET + 8], b"04011600");

        // Trailing checksum covers everything before itself.
        let expected = crc32fast::hash(&packet[..CRC_OFFSET]);
        assert_eq!(BigEndian::read_u32(&packet[CRC_OFFSET..]), expected);
    }

    #[test]
    fn operation_code_priorities() {
        let (mut session, mut cfg, joysticks, _rx) = harness();
        cfg.set_control_mode(ControlMode::Autonomous);
        cfg.set_enabled(true);

        let packet = session.generate_robot_packet(&cfg, &joysticks);
        assert_eq!(packet[2], ESTOP_OFF | ENABLED | MODE_AUTONOMOUS | RESYNC);

        session.protocol.reboot_robot();
        let packet = session.generate_robot_packet(&cfg, &joysticks);
        assert_eq!(packet[2], REBOOT);

        session.protocol.on_robot_watchdog_expired();
        cfg.set_operation_status(OperationStatus::EmergencyStop);
        let packet = session.generate_robot_packet(&cfg, &joysticks);
        assert_eq!(packet[2], ESTOP_ON);
    }

    #[test]
    fn joystick_slots_are_always_encoded() {
        let (mut session, cfg, mut joysticks, _rx) = harness();
        let caps = JoystickCaps {
            joysticks: 4,
            axes: 6,
            buttons: 12,
            povs: 0,
        };
        joysticks.register(2, 2, 0, &caps);
        joysticks.update_axis(0, 0, 1.0);
        joysticks.update_axis(0, 1, -1.0);
        joysticks.update_button(0, 1, true);

        let packet = session.generate_robot_packet(&cfg, &joysticks);

        // Slot 0: two live axes, four neutral ones, then the button field.
        assert_eq!(packet[8], 127);
        assert_eq!(packet[9], (-127i8) as u8);
        assert_eq!(&packet[10..14], &[0, 0, 0, 0]);
        assert_eq!(&packet[14..16], &[0x00, 0x02]);

        // Detached slots stay neutral; version string follows slot 7.
        assert_eq!(&packet[16..24], &[0u8; 8]);
        assert_eq!(packet[VERSION_OFFSET - 1], 0x00);
    }

    #[test]
    fn reply_voltage_is_bcd_encoded() {
        let (mut session, mut cfg, _joysticks, _rx) = harness();

        let mut reply = vec![0u8; PACKET_SIZE];
        reply[0] = ESTOP_OFF;
        reply[1] = 0x12;
        reply[2] = 0x70;
        assert!(session.read_robot_packet(&mut cfg, &reply));
        assert!(cfg.is_robot_code_running());
        assert!(!cfg.is_emergency_stopped());
        assert_eq!(cfg.voltage(), 12.7);
    }

    #[test]
    fn no_code_sentinel_zeroes_the_voltage() {
        let (mut session, mut cfg, _joysticks, _rx) = harness();

        let mut reply = vec![0u8; PACKET_SIZE];
        reply[0] = ESTOP_OFF;
        reply[1] = NO_CODE_SENTINEL;
        reply[2] = NO_CODE_SENTINEL;
        assert!(session.read_robot_packet(&mut cfg, &reply));
        assert!(!cfg.is_robot_code_running());
        assert_eq!(cfg.voltage(), 0.0);
    }

    #[test]
    fn estop_echo_is_latched() {
        let (mut session, mut cfg, _joysticks, _rx) = harness();

        let reply = vec![0u8; PACKET_SIZE];
        assert!(session.read_robot_packet(&mut cfg, &reply));
        assert!(cfg.is_emergency_stopped());
    }

    #[test]
    fn short_replies_are_rejected() {
        let (mut session, mut cfg, _joysticks, _rx) = harness();
        assert!(!session.read_robot_packet(&mut cfg, &[0u8; 512]));
        assert!(!cfg.is_connected_to_robot());
    }

    #[test]
    fn default_addresses() {
        let proto = Frc2014::new();
        assert_eq!(proto.default_radio_address(118), "10.01.18.1");
        assert_eq!(proto.default_robot_addresses(118), vec!["10.01.18.2"]);
        assert_eq!(proto.tcp_probe_port(), Some(80));
    }
}
