//! The configuration bus: single source of truth for everything the driver
//! station knows about itself and the robot.
//!
//! Every setter is change-detecting. Writing the value already stored is a
//! no-op; writing a new value stores it and synchronously publishes one typed
//! [`Event`], plus a composite [`Event::StatusChanged`] for the fields that
//! feed the status label. Observers therefore always see the state already
//! updated when the notification arrives.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::elapsed::{ElapsedTimer, format_elapsed};
use crate::event::Event;

/// Control mode requested by the operator (or dictated by the FMS).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlMode {
    Test,
    Autonomous,
    Teleoperated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnableStatus {
    Disabled,
    Enabled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Normal,
    EmergencyStop,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Alliance {
    Red,
    Blue,
}

/// Station position within the alliance wall.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Position {
    Position1,
    Position2,
    Position3,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommStatus {
    Failing,
    Working,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodeStatus {
    Failing,
    Running,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoltageStatus {
    Normal,
    Brownout,
}

/// Mutable record of the driver station state, shared between the engine and
/// the active protocol for the duration of a call.
pub struct DsConfig {
    team: u16,
    voltage: f32,
    alliance: Alliance,
    position: Position,
    control_mode: ControlMode,
    enable_status: EnableStatus,
    operation_status: OperationStatus,
    code_status: CodeStatus,
    fms_comm_status: CommStatus,
    radio_comm_status: CommStatus,
    robot_comm_status: CommStatus,
    voltage_status: VoltageStatus,
    lib_version: String,
    pcm_version: String,
    pdp_version: String,
    simulated: bool,
    timer: ElapsedTimer,
    events: UnboundedSender<Event>,
}

impl DsConfig {
    pub fn new(events: UnboundedSender<Event>) -> DsConfig {
        DsConfig {
            team: 0,
            voltage: 0.0,
            alliance: Alliance::Red,
            position: Position::Position1,
            control_mode: ControlMode::Teleoperated,
            enable_status: EnableStatus::Disabled,
            operation_status: OperationStatus::Normal,
            code_status: CodeStatus::Failing,
            fms_comm_status: CommStatus::Failing,
            radio_comm_status: CommStatus::Failing,
            robot_comm_status: CommStatus::Failing,
            voltage_status: VoltageStatus::Normal,
            lib_version: String::new(),
            pcm_version: String::new(),
            pdp_version: String::new(),
            simulated: false,
            timer: ElapsedTimer::new(),
            events,
        }
    }

    #[inline(always)]
    pub const fn team(&self) -> u16 {
        self.team
    }

    #[inline(always)]
    pub const fn voltage(&self) -> f32 {
        self.voltage
    }

    #[inline(always)]
    pub const fn alliance(&self) -> Alliance {
        self.alliance
    }

    #[inline(always)]
    pub const fn position(&self) -> Position {
        self.position
    }

    #[inline(always)]
    pub const fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    #[inline(always)]
    pub const fn enable_status(&self) -> EnableStatus {
        self.enable_status
    }

    #[inline(always)]
    pub const fn operation_status(&self) -> OperationStatus {
        self.operation_status
    }

    #[inline(always)]
    pub const fn code_status(&self) -> CodeStatus {
        self.code_status
    }

    #[inline(always)]
    pub const fn voltage_status(&self) -> VoltageStatus {
        self.voltage_status
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enable_status == EnableStatus::Enabled
    }

    #[inline(always)]
    pub fn is_emergency_stopped(&self) -> bool {
        self.operation_status == OperationStatus::EmergencyStop
    }

    #[inline(always)]
    pub fn is_robot_code_running(&self) -> bool {
        self.code_status == CodeStatus::Running
    }

    #[inline(always)]
    pub fn is_connected_to_fms(&self) -> bool {
        self.fms_comm_status == CommStatus::Working
    }

    #[inline(always)]
    pub fn is_connected_to_radio(&self) -> bool {
        self.radio_comm_status == CommStatus::Working
    }

    #[inline(always)]
    pub fn is_connected_to_robot(&self) -> bool {
        self.robot_comm_status == CommStatus::Working
    }

    #[inline(always)]
    pub fn is_voltage_brownout(&self) -> bool {
        self.voltage_status == VoltageStatus::Brownout
    }

    #[inline(always)]
    pub const fn is_simulated(&self) -> bool {
        self.simulated
    }

    #[inline(always)]
    pub fn lib_version(&self) -> &str {
        &self.lib_version
    }

    #[inline(always)]
    pub fn pcm_version(&self) -> &str {
        &self.pcm_version
    }

    #[inline(always)]
    pub fn pdp_version(&self) -> &str {
        &self.pdp_version
    }

    /// Whether enabling the robot can be expected to work. This is a UI hint
    /// only; `set_enabled(true)` is always accepted and the robot has the
    /// last word.
    pub fn can_be_enabled(&self) -> bool {
        self.is_connected_to_robot() && self.is_robot_code_running() && !self.is_emergency_stopped()
    }

    /// Changes the team number. Values outside `1..=9999` are rejected
    /// silently.
    pub fn set_team(&mut self, team: u16) {
        if !(1..=9999).contains(&team) {
            debug!("rejecting out-of-range team number {}", team);
            return;
        }

        if self.team != team {
            self.team = team;
            debug!("team number set to {}", team);
            self.emit(Event::TeamChanged(team));
        }
    }

    pub fn set_alliance(&mut self, alliance: Alliance) {
        if self.alliance != alliance {
            self.alliance = alliance;
            debug!("alliance set to {:?}", alliance);
            self.emit(Event::AllianceChanged(alliance));
        }
    }

    pub fn set_position(&mut self, position: Position) {
        if self.position != position {
            self.position = position;
            debug!("position set to {:?}", position);
            self.emit(Event::PositionChanged(position));
        }
    }

    /// Stores the robot battery voltage, rounded to 0.01 V. Non-finite
    /// values are rejected.
    pub fn set_voltage(&mut self, voltage: f32) {
        if !voltage.is_finite() {
            return;
        }

        let rounded = (voltage * 100.0).round() / 100.0;
        if self.voltage != rounded {
            self.voltage = rounded;
            self.emit(Event::VoltageChanged {
                volts: rounded,
                formatted: format_voltage(rounded),
            });
        }
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) {
        if self.control_mode != mode {
            self.control_mode = mode;

            // Switching modes while enabled restarts the match stopwatch.
            if self.is_enabled() {
                self.timer.restart();
            }

            debug!("control mode set to {:?}", mode);
            self.emit(Event::ControlModeChanged(mode));
            self.emit_status();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let status = if enabled {
            EnableStatus::Enabled
        } else {
            EnableStatus::Disabled
        };
        self.set_enable_status(status);
    }

    pub fn set_enable_status(&mut self, status: EnableStatus) {
        if self.enable_status != status {
            self.enable_status = status;

            if status == EnableStatus::Enabled {
                self.timer.restart();
            } else {
                self.timer.stop();
                self.emit(Event::ElapsedTimeChanged {
                    millis: 0,
                    formatted: format_elapsed(0),
                });
            }

            debug!("enable status set to {:?}", status);
            self.emit(Event::EnabledChanged(status));
            self.emit_status();
        }
    }

    pub fn set_emergency_stop(&mut self, estop: bool) {
        let status = if estop {
            OperationStatus::EmergencyStop
        } else {
            OperationStatus::Normal
        };
        self.set_operation_status(status);
    }

    pub fn set_operation_status(&mut self, status: OperationStatus) {
        if self.operation_status != status {
            self.operation_status = status;
            debug!("operation status set to {:?}", status);
            self.emit(Event::OperationStatusChanged(status));
            self.emit_status();

            // An emergency stop always takes outputs down with it.
            if status == OperationStatus::EmergencyStop {
                self.set_enabled(false);
            }
        }
    }

    pub fn set_robot_code(&mut self, running: bool) {
        let status = if running {
            CodeStatus::Running
        } else {
            CodeStatus::Failing
        };

        if self.code_status != status {
            self.code_status = status;
            debug!("code status set to {:?}", status);
            self.emit(Event::CodeStatusChanged(status));
            self.emit_status();
        }
    }

    pub fn set_brownout(&mut self, brownout: bool) {
        let status = if brownout {
            VoltageStatus::Brownout
        } else {
            VoltageStatus::Normal
        };

        if self.voltage_status != status {
            self.voltage_status = status;
            debug!("voltage status set to {:?}", status);
            self.emit(Event::VoltageStatusChanged(status));
            self.emit_status();
        }
    }

    pub fn set_fms_comm_status(&mut self, status: CommStatus) {
        if self.fms_comm_status != status {
            self.fms_comm_status = status;
            debug!("FMS comm status set to {:?}", status);
            self.emit(Event::FmsCommStatusChanged(status));
            self.emit_status();
        }
    }

    pub fn set_radio_comm_status(&mut self, status: CommStatus) {
        if self.radio_comm_status != status {
            self.radio_comm_status = status;
            debug!("radio comm status set to {:?}", status);
            self.emit(Event::RadioCommStatusChanged(status));
        }
    }

    pub fn set_robot_comm_status(&mut self, status: CommStatus) {
        if self.robot_comm_status != status {
            self.robot_comm_status = status;
            debug!("robot comm status set to {:?}", status);
            self.emit(Event::RobotCommStatusChanged(status));
            self.emit_status();
        }
    }

    pub fn set_lib_version(&mut self, version: String) {
        if self.lib_version != version {
            self.lib_version = version.clone();
            self.emit(Event::LibVersionChanged(version));
        }
    }

    pub fn set_pcm_version(&mut self, version: String) {
        if self.pcm_version != version {
            self.pcm_version = version.clone();
            self.emit(Event::PcmVersionChanged(version));
        }
    }

    pub fn set_pdp_version(&mut self, version: String) {
        if self.pdp_version != version {
            self.pdp_version = version.clone();
            self.emit(Event::PdpVersionChanged(version));
        }
    }

    pub fn set_simulated(&mut self, simulated: bool) {
        self.simulated = simulated;
    }

    /// Returns the composite status string shown below the status lights.
    pub fn general_status(&self) -> String {
        if !self.is_connected_to_robot() {
            return "No Robot Communication".to_string();
        }

        if !self.is_robot_code_running() {
            return "No Robot Code".to_string();
        }

        if self.is_voltage_brownout() {
            return "Voltage Brownout".to_string();
        }

        if self.is_emergency_stopped() {
            return "Emergency Stopped".to_string();
        }

        let mode = match self.control_mode {
            ControlMode::Test => "Test",
            ControlMode::Autonomous => "Autonomous",
            ControlMode::Teleoperated => "Teleoperated",
        };

        let enabled = match self.enable_status {
            EnableStatus::Enabled => "Enabled",
            EnableStatus::Disabled => "Disabled",
        };

        format!("{} {}", mode, enabled)
    }

    /// Publishes a stopwatch reading. Driven by the engine every 100 ms; only
    /// produces output while enabled, connected and not emergency stopped.
    pub(crate) fn tick_elapsed(&mut self) {
        if self.timer.is_running() && self.is_connected_to_robot() && !self.is_emergency_stopped() {
            let millis = self.timer.elapsed_millis();
            self.emit(Event::ElapsedTimeChanged {
                millis,
                formatted: format_elapsed(millis),
            });
        }
    }

    pub(crate) fn emit_status(&self) {
        self.emit(Event::StatusChanged(self.general_status()));
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Renders a voltage as `NN.NN V`: two zero-padded integer digits and the
/// truncated hundredths of the fractional part.
fn format_voltage(voltage: f32) -> String {
    let integer = voltage.trunc() as u32;
    let decimal = ((voltage - voltage.trunc()) * 100.0).floor() as u32;
    format!("{:02}.{:02} V", integer, decimal)
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn config() -> (DsConfig, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        (DsConfig::new(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = vec![];
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn setters_are_change_detecting() {
        let (mut cfg, mut rx) = config();

        cfg.set_control_mode(ControlMode::Autonomous);
        cfg.set_control_mode(ControlMode::Autonomous);

        let events = drain(&mut rx);
        let mode_changes = events
            .iter()
            .filter(|e| matches!(e, Event::ControlModeChanged(_)))
            .count();
        assert_eq!(mode_changes, 1);
    }

    #[test]
    fn team_number_is_validated() {
        let (mut cfg, mut rx) = config();

        cfg.set_team(0);
        cfg.set_team(10_000);
        assert_eq!(cfg.team(), 0);
        assert!(drain(&mut rx).is_empty());

        cfg.set_team(3794);
        assert_eq!(cfg.team(), 3794);
        assert_eq!(drain(&mut rx), vec![Event::TeamChanged(3794)]);
    }

    #[test]
    fn status_string_precedence() {
        let (mut cfg, _rx) = config();
        assert_eq!(cfg.general_status(), "No Robot Communication");

        cfg.set_robot_comm_status(CommStatus::Working);
        assert_eq!(cfg.general_status(), "No Robot Code");

        cfg.set_robot_code(true);
        assert_eq!(cfg.general_status(), "Teleoperated Disabled");

        cfg.set_enabled(true);
        cfg.set_control_mode(ControlMode::Autonomous);
        assert_eq!(cfg.general_status(), "Autonomous Enabled");

        cfg.set_brownout(true);
        assert_eq!(cfg.general_status(), "Voltage Brownout");

        cfg.set_brownout(false);
        cfg.set_emergency_stop(true);
        assert_eq!(cfg.general_status(), "Emergency Stopped");
    }

    #[test]
    fn emergency_stop_forces_disable() {
        let (mut cfg, mut rx) = config();
        cfg.set_enabled(true);
        drain(&mut rx);

        cfg.set_emergency_stop(true);
        let events = drain(&mut rx);
        assert!(
            events
                .iter()
                .any(|e| *e == Event::OperationStatusChanged(OperationStatus::EmergencyStop))
        );
        assert!(
            events
                .iter()
                .any(|e| *e == Event::EnabledChanged(EnableStatus::Disabled))
        );
        assert!(events.contains(&Event::StatusChanged("Emergency Stopped".to_string())));
    }

    #[test]
    fn can_be_enabled_invariant() {
        let (mut cfg, _rx) = config();
        assert!(!cfg.can_be_enabled());

        cfg.set_robot_comm_status(CommStatus::Working);
        assert!(!cfg.can_be_enabled());

        cfg.set_robot_code(true);
        assert!(cfg.can_be_enabled());

        cfg.set_emergency_stop(true);
        assert!(!cfg.can_be_enabled());
    }

    #[test]
    fn voltage_is_rounded_and_formatted() {
        let (mut cfg, mut rx) = config();

        cfg.set_voltage(f32::NAN);
        assert!(drain(&mut rx).is_empty());

        cfg.set_voltage(12.698_823);
        assert_eq!(cfg.voltage(), 12.7);
        match drain(&mut rx).pop().unwrap() {
            Event::VoltageChanged { volts, formatted } => {
                assert_eq!(volts, 12.7);
                assert!(formatted.starts_with("12.") && formatted.ends_with(" V"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        cfg.set_voltage(9.5);
        match drain(&mut rx).pop().unwrap() {
            Event::VoltageChanged { formatted, .. } => assert_eq!(formatted, "09.50 V"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
