//! The 2015 FRC communication protocol.
//!
//! Robot packets run at 50 Hz and carry a control byte, a request byte, the
//! team station and either the joystick snapshot or (when the robot asks for
//! it) the client date/time. FMS packets run at 2 Hz and mirror the control
//! state plus the link health bits.

use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, Timelike, Utc};
use tracing::trace;

use crate::config::{Alliance, ControlMode, DsConfig, Position};
use crate::ext::BufExt;
use crate::joystick::{Joystick, JoystickRegistry};
use crate::proto::{Counters, Protocol};
use crate::util::{ip_from_team, pack_buttons};

pub(crate) const TAG_GENERAL: u8 = 0x01;
pub(crate) const TAG_JOYSTICK: u8 = 0x0c;
pub(crate) const TAG_DATE: u8 = 0x0f;
pub(crate) const TAG_TIMEZONE: u8 = 0x10;

const REQUEST_UNCONNECTED: u8 = 0x00;
const REQUEST_NORMAL: u8 = 0x80;
const REQUEST_REBOOT: u8 = 0x08;
const REQUEST_RESTART_CODE: u8 = 0x04;

const FMS_COMM_VERSION: u8 = 0x00;
const FMS_RADIO_PING: u8 = 0x10;
const FMS_ROBOT_COMMS: u8 = 0x20;
const FMS_ROBOT_PING: u8 = 0x08;

/// The robot asks for the date/time payload with this request echo.
const ROBOT_REQUEST_TIME: u8 = 0x01;

/// Timezone string reported alongside the date/time payload. All timestamps
/// sent to the robot are UTC.
const TIMEZONE: &str = "UTC";

bitflags! {
    /// Control byte of the client-to-robot (and client-to-FMS) packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Control: u8 {
        const ESTOP = 0x80;
        const FMS_ATTACHED = 0x08;
        const ENABLED = 0x04;

        // Mode flags
        const TELEOP = 0x00;
        const TEST = 0x01;
        const AUTONOMOUS = 0x02;
    }
}

bitflags! {
    /// Status byte echoed by the robot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Status: u8 {
        const CODE_RUNNING = 0x20;
        const BROWNOUT = 0x10;
    }
}

/// Implementation of the 2015 season protocol.
pub struct Frc2015 {
    reboot: bool,
    restart_code: bool,
    send_date_time: bool,
}

impl Frc2015 {
    pub fn new() -> Frc2015 {
        Frc2015 {
            reboot: false,
            restart_code: false,
            send_date_time: false,
        }
    }

    fn control_byte(&self, cfg: &DsConfig) -> u8 {
        let mut code = match cfg.control_mode() {
            ControlMode::Test => Control::TEST,
            ControlMode::Autonomous => Control::AUTONOMOUS,
            ControlMode::Teleoperated => Control::TELEOP,
        };

        if cfg.is_connected_to_fms() {
            code |= Control::FMS_ATTACHED;
        }

        if cfg.is_emergency_stopped() {
            code |= Control::ESTOP;
        }

        if cfg.is_enabled() {
            code |= Control::ENABLED;
        }

        code.bits()
    }

    /// The request byte: silent until the robot answers, then "operate
    /// normally", optionally OR'd with the one-shot reboot/restart bits.
    fn request_byte(&self, cfg: &DsConfig) -> u8 {
        if !cfg.is_connected_to_robot() {
            return REQUEST_UNCONNECTED;
        }

        let mut code = REQUEST_NORMAL;
        if self.reboot {
            code |= REQUEST_REBOOT;
        }
        if self.restart_code {
            code |= REQUEST_RESTART_CODE;
        }
        code
    }

    fn fms_control_byte(&self, cfg: &DsConfig) -> u8 {
        let mut code = Control::from_bits_retain(self.control_byte(cfg));
        code.remove(Control::FMS_ATTACHED);
        let mut code = code.bits();

        if cfg.is_connected_to_radio() {
            code |= FMS_RADIO_PING;
        }

        if cfg.is_connected_to_robot() {
            code |= FMS_ROBOT_COMMS;
            code |= FMS_ROBOT_PING;
        }

        code
    }

    /// One joystick section per attached stick, in registry order. Empty for
    /// the first five packets of a fresh session so the robot settles into
    /// communications before seeing inputs.
    fn joystick_data(&self, counters: &Counters, joysticks: &JoystickRegistry) -> BytesMut {
        let mut data = BytesMut::new();

        if counters.sent_robot_packets() <= 5 {
            return data;
        }

        for stick in joysticks.iter() {
            data.put_u8((joystick_section_size(stick) - 1) as u8);
            data.put_u8(TAG_JOYSTICK);

            data.put_u8(stick.num_axes() as u8);
            for &axis in &stick.axes {
                data.put_i8((axis * 127.0) as i8);
            }

            data.put_u8(stick.num_buttons() as u8);
            data.put_slice(&pack_buttons(&stick.buttons));

            data.put_u8(stick.num_povs() as u8);
            for &pov in &stick.povs {
                data.put_i16(pov);
            }
        }

        data
    }

    /// The date/time and timezone payload, sent in place of the joystick
    /// block when the robot requested it (e.g. while initializing its code).
    fn timezone_data(&self) -> BytesMut {
        let now = Utc::now();
        let millis = now.timestamp_subsec_millis() as u16;

        let mut data = BytesMut::new();
        data.put_u8(0x0b);
        data.put_u8(TAG_DATE);
        data.put_u16(millis);
        data.put_u8(now.second() as u8);
        data.put_u8(now.minute() as u8);
        data.put_u8(now.hour() as u8);
        data.put_u8(now.day() as u8);
        data.put_u8(now.month() as u8);
        data.put_u8((now.year() - 1900) as u8);

        data.put_u8((TIMEZONE.len() + 1) as u8);
        data.put_u8(TAG_TIMEZONE);
        data.put_slice(TIMEZONE.as_bytes());

        data
    }
}

impl Default for Frc2015 {
    fn default() -> Frc2015 {
        Frc2015::new()
    }
}

impl Protocol for Frc2015 {
    fn name(&self) -> &'static str {
        "FRC 2015 Protocol"
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

    fn netconsole_input_port(&self) -> Option<u16> {
        Some(6666)
    }

    fn default_radio_address(&self, team: u16) -> String {
        ip_from_team(team, 1)
    }

    fn default_robot_addresses(&self, team: u16) -> Vec<String> {
        vec![
            format!("roboRIO-{}.local", team),
            "172.22.11.2".to_string(),
            ip_from_team(team, 2),
        ]
    }

    fn reboot_robot(&mut self) {
        self.reboot = true;
    }

    fn restart_robot_code(&mut self) {
        self.restart_code = true;
    }

    /// Dropping the one-shot flags here means a robot that reconnects is not
    /// greeted with a stale reboot or restart command.
    fn on_robot_watchdog_expired(&mut self) {
        self.reboot = false;
        self.restart_code = false;
        self.send_date_time = false;
    }

    fn fms_packet(&mut self, counters: &Counters, cfg: &DsConfig) -> Bytes {
        let voltage = cfg.voltage();

        let mut data = BytesMut::with_capacity(8);
        data.put_u16((counters.sent_fms_packets() & 0xffff) as u16);
        data.put_u8(FMS_COMM_VERSION);
        data.put_u8(self.fms_control_byte(cfg));
        data.put_u16(cfg.team());
        data.put_u8(voltage.trunc() as u8);
        data.put_u8(((voltage - voltage.trunc()) * 100.0).floor() as u8);
        data.freeze()
    }

    fn robot_packet(
        &mut self,
        counters: &Counters,
        cfg: &DsConfig,
        joysticks: &JoystickRegistry,
    ) -> Bytes {
        let mut data = BytesMut::new();
        data.put_u16((counters.sent_robot_packets() & 0xffff) as u16);
        data.put_u8(TAG_GENERAL);
        data.put_u8(self.control_byte(cfg));
        data.put_u8(self.request_byte(cfg));
        data.put_u8(station_code(cfg.alliance(), cfg.position()));

        if self.send_date_time {
            data.put(self.timezone_data());
        } else {
            data.put(self.joystick_data(counters, joysticks));
        }

        data.freeze()
    }

    /// Follows the instructions dictated by the FMS: enabled state, control
    /// mode and team station.
    fn interpret_fms_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
        let Ok((control, station)) = decode_fms_packet(data) else {
            trace!("{}: received invalid FMS packet", self.name());
            return false;
        };

        cfg.set_enabled(control & Control::ENABLED.bits() != 0);
        cfg.set_control_mode(mode_from_bits(control));
        cfg.set_alliance(alliance_from_station(station));
        cfg.set_position(position_from_station(station));

        true
    }

    /// Extracts voltage, code status, brownout and emergency-stop state from
    /// the robot's reply, and latches whether the next packet should carry
    /// the date/time payload.
    fn interpret_robot_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
        let Ok(reply) = RobotReply::decode(data) else {
            trace!("{}: received invalid robot packet", self.name());
            return false;
        };

        cfg.set_robot_code(reply.status.contains(Status::CODE_RUNNING));
        cfg.set_brownout(reply.status.contains(Status::BROWNOUT));
        cfg.set_emergency_stop(reply.control & Control::ESTOP.bits() != 0);
        self.send_date_time = reply.request == ROBOT_REQUEST_TIME;
        cfg.set_voltage(reply.voltage);

        true
    }
}

/// Decoded form of the robot's periodic reply.
struct RobotReply {
    control: u8,
    status: Status,
    voltage: f32,
    request: u8,
}

impl RobotReply {
    fn decode(mut data: &[u8]) -> crate::Result<RobotReply> {
        let _index = data.read_u16_be()?;
        let _version = data.read_u8()?;
        let control = data.read_u8()?;
        let status = Status::from_bits_retain(data.read_u8()?);
        let voltage = {
            let integer = data.read_u8()?;
            let decimal = data.read_u8()?;
            f32::from(integer) + f32::from(decimal) * 99.0 / 255.0 / 100.0
        };
        let request = data.read_u8()?;

        Ok(RobotReply {
            control,
            status,
            voltage,
            request,
        })
    }
}

/// Pulls the control and station bytes out of an FMS datagram.
fn decode_fms_packet(mut data: &[u8]) -> crate::Result<(u8, u8)> {
    ensure!(data.len() >= 22, "FMS packet too short");

    let _index = data.read_u16_be()?;
    let _version = data.read_u8()?;
    let control = data.read_u8()?;
    let _request = data.read_u8()?;
    let station = data.read_u8()?;

    Ok((control, station))
}

/// Size of one joystick section, counting the leading length byte.
fn joystick_section_size(stick: &Joystick) -> usize {
    5 + stick.num_axes() + stick.num_buttons().div_ceil(8) + stick.num_povs() * 2
}

/// Maps alliance and position to the wire station code (Red1..Blue3 =
/// 0x00..0x05).
pub(crate) fn station_code(alliance: Alliance, position: Position) -> u8 {
    let offset = match position {
        Position::Position1 => 0,
        Position::Position2 => 1,
        Position::Position3 => 2,
    };

    match alliance {
        Alliance::Red => offset,
        Alliance::Blue => offset + 3,
    }
}

pub(crate) fn alliance_from_station(station: u8) -> Alliance {
    if (3..=5).contains(&station) {
        Alliance::Blue
    } else {
        Alliance::Red
    }
}

pub(crate) fn position_from_station(station: u8) -> Position {
    match station % 3 {
        1 => Position::Position2,
        2 => Position::Position3,
        _ => Position::Position1,
    }
}

fn mode_from_bits(control: u8) -> ControlMode {
    match control & 0x03 {
        0x02 => ControlMode::Autonomous,
        0x01 => ControlMode::Test,
        _ => ControlMode::Teleoperated,
    }
}
