//! Change notifications published by the driver station core.
//!
//! Every mutation of the configuration bus that actually changes a value
//! produces exactly one typed event. Mutations of the mode/enable/operation/
//! code/comms/voltage-status subset additionally produce a composite
//! [`Event::StatusChanged`] carrying the same string shown in the big status
//! label of the official Driver Station.

use crate::config::{
    Alliance, CodeStatus, CommStatus, ControlMode, EnableStatus, OperationStatus, Position,
    VoltageStatus,
};

/// A state change observable by the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TeamChanged(u16),
    AllianceChanged(Alliance),
    PositionChanged(Position),
    ControlModeChanged(ControlMode),
    EnabledChanged(EnableStatus),
    OperationStatusChanged(OperationStatus),
    /// Battery voltage reported by the robot, rounded to 0.01 V, along with
    /// the `NN.NN V` display string.
    VoltageChanged { volts: f32, formatted: String },
    VoltageStatusChanged(VoltageStatus),
    CodeStatusChanged(CodeStatus),
    FmsCommStatusChanged(CommStatus),
    RadioCommStatusChanged(CommStatus),
    RobotCommStatusChanged(CommStatus),
    LibVersionChanged(String),
    PcmVersionChanged(String),
    PdpVersionChanged(String),
    /// Enable-scoped stopwatch reading, emitted every 100 ms while the robot
    /// is enabled, connected and not emergency stopped.
    ElapsedTimeChanged { millis: u64, formatted: String },
    JoystickCountChanged(usize),
    /// A NetConsole datagram, decoded as UTF-8 (lossily).
    NewMessage(String),
    /// Composite status string, e.g. `"Teleoperated Enabled"`.
    StatusChanged(String),
    Initialized,
    ProtocolChanged,
}
