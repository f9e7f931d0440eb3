//! The public driver station handle.
//!
//! [`DriverStation`] is a cheap handle over the engine task that owns every
//! socket, timer and piece of state. Operator calls are forwarded as
//! commands and handled on the engine's event loop; observable changes come
//! back on the [`Event`] stream returned by [`DriverStation::new`].

mod engine;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;

use self::engine::Engine;
use crate::config::{Alliance, ControlMode, OperationStatus, Position};
use crate::event::Event;
use crate::proto::ProtocolKind;

/// Commands forwarded from the handle to the engine task.
pub(crate) enum Command {
    Init,
    Start,
    Stop,
    SetTeam(u16),
    SetAlliance(Alliance),
    SetPosition(Position),
    SetTeamStation(u8),
    SetControlMode(ControlMode),
    SetEnabled(bool),
    SetOperationStatus(OperationStatus),
    SetProtocol(ProtocolKind),
    SetCustomFmsAddress(String),
    SetCustomRadioAddress(String),
    SetCustomRobotAddress(String),
    RegisterJoystick {
        axes: usize,
        buttons: usize,
        povs: usize,
        reply: oneshot::Sender<bool>,
    },
    RemoveJoystick(usize),
    ResetJoysticks,
    UpdateAxis {
        stick: usize,
        axis: usize,
        value: f32,
    },
    UpdateButton {
        stick: usize,
        button: usize,
        pressed: bool,
    },
    UpdatePov {
        stick: usize,
        pov: usize,
        angle: i16,
    },
    RebootRobot,
    RestartRobotCode,
    SendConsoleMessage(String),
    SetScanRate(usize),
    SetSimulated(bool),
    SetLibVersion(String),
    SetPcmVersion(String),
    SetPdpVersion(String),
}

/// A driver station client.
///
/// Dropping the last handle shuts the engine task down.
pub struct DriverStation {
    commands: UnboundedSender<Command>,
}

impl DriverStation {
    /// Creates a driver station and spawns its engine task onto the current
    /// Tokio runtime. The returned receiver carries every observable state
    /// change; no packets flow until a protocol is selected with
    /// [`set_protocol`](Self::set_protocol).
    pub fn new() -> (DriverStation, UnboundedReceiver<Event>) {
        let (commands, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();

        tokio::spawn(async move {
            Engine::new(event_tx).run(command_rx).await;
        });

        (DriverStation { commands }, event_rx)
    }

    fn send(&self, command: Command) {
        let _ = self.commands.send(command);
    }

    /// Starts DS operations. Safe to call more than once; only the first
    /// call has an effect.
    pub fn init(&self) {
        self.send(Command::Init);
    }

    /// Resumes packet exchange after a [`stop`](Self::stop).
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// Inhibits packet exchange. Timers keep running but produce nothing.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Changes the team number (1 to 9999), re-deriving the default FMS,
    /// radio and robot addresses.
    pub fn set_team(&self, team: u16) {
        self.send(Command::SetTeam(team));
    }

    pub fn set_alliance(&self, alliance: Alliance) {
        self.send(Command::SetAlliance(alliance));
    }

    pub fn set_position(&self, position: Position) {
        self.send(Command::SetPosition(position));
    }

    /// Sets alliance and position from a station code (0 to 5, Red 1 to
    /// Blue 3).
    pub fn set_team_station(&self, station: u8) {
        self.send(Command::SetTeamStation(station));
    }

    pub fn set_control_mode(&self, mode: ControlMode) {
        self.send(Command::SetControlMode(mode));
    }

    /// Changes the enabled state of the robot. Enabling is always forwarded;
    /// whether the robot acts on it is its own decision.
    pub fn set_enabled(&self, enabled: bool) {
        self.send(Command::SetEnabled(enabled));
    }

    pub fn set_operation_status(&self, status: OperationStatus) {
        self.send(Command::SetOperationStatus(status));
    }

    /// Loads the given protocol: reconfigures sockets, send rates, watchdogs
    /// and joystick limits, then restarts packet exchange.
    pub fn set_protocol(&self, kind: ProtocolKind) {
        self.send(Command::SetProtocol(kind));
    }

    /// Overrides the FMS address. An empty string restores the protocol
    /// default.
    pub fn set_custom_fms_address(&self, address: impl Into<String>) {
        self.send(Command::SetCustomFmsAddress(address.into()));
    }

    /// Overrides the radio address. An empty string restores the protocol
    /// default.
    pub fn set_custom_radio_address(&self, address: impl Into<String>) {
        self.send(Command::SetCustomRadioAddress(address.into()));
    }

    /// Overrides the robot address. An empty string re-engages network
    /// scanning.
    pub fn set_custom_robot_address(&self, address: impl Into<String>) {
        self.send(Command::SetCustomRobotAddress(address.into()));
    }

    /// Registers a joystick with the given capabilities. Returns `false` if
    /// the joystick has no inputs at all or the active protocol's joystick
    /// limit is reached.
    pub async fn register_joystick(&self, axes: usize, buttons: usize, povs: usize) -> bool {
        let (reply, response) = oneshot::channel();
        self.send(Command::RegisterJoystick {
            axes,
            buttons,
            povs,
            reply,
        });
        response.await.unwrap_or(false)
    }

    pub fn remove_joystick(&self, index: usize) {
        self.send(Command::RemoveJoystick(index));
    }

    pub fn reset_joysticks(&self) {
        self.send(Command::ResetJoysticks);
    }

    /// Updates an axis value in `[-1, 1]`. Out-of-range indices are ignored.
    pub fn update_axis(&self, stick: usize, axis: usize, value: f32) {
        self.send(Command::UpdateAxis { stick, axis, value });
    }

    pub fn update_button(&self, stick: usize, button: usize, pressed: bool) {
        self.send(Command::UpdateButton {
            stick,
            button,
            pressed,
        });
    }

    /// Updates a POV hat angle in degrees, `-1` for released.
    pub fn update_pov(&self, stick: usize, pov: usize, angle: i16) {
        self.send(Command::UpdatePov { stick, pov, angle });
    }

    /// Asks the robot controller to reboot with the next packet cycle.
    pub fn reboot_robot(&self) {
        self.send(Command::RebootRobot);
    }

    /// Asks the robot controller to restart the robot code with the next
    /// packet cycle.
    pub fn restart_robot_code(&self) {
        self.send(Command::RestartRobotCode);
    }

    /// Broadcasts a NetConsole message to the robot.
    pub fn send_console_message(&self, message: impl Into<String>) {
        self.send(Command::SendConsoleMessage(message.into()));
    }

    /// Overrides the number of addresses probed per robot tick while
    /// scanning. Zero restores the automatic rate.
    pub fn set_scan_rate(&self, rate: usize) {
        self.send(Command::SetScanRate(rate));
    }

    pub fn set_simulated(&self, simulated: bool) {
        self.send(Command::SetSimulated(simulated));
    }

    pub fn set_lib_version(&self, version: impl Into<String>) {
        self.send(Command::SetLibVersion(version.into()));
    }

    pub fn set_pcm_version(&self, version: impl Into<String>) {
        self.send(Command::SetPcmVersion(version.into()));
    }

    pub fn set_pdp_version(&self, version: impl Into<String>) {
        self.send(Command::SetPdpVersion(version.into()));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn init_reports_initial_state() {
        let (ds, mut events) = DriverStation::new();
        ds.set_team(3794);
        ds.set_protocol(ProtocolKind::Frc2016);
        ds.init();

        let mut saw_initialized = false;
        let mut saw_status = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await
        {
            match event {
                Event::Initialized => saw_initialized = true,
                Event::StatusChanged(status) => {
                    saw_status = status == "No Robot Communication";
                }
                _ => {}
            }

            if saw_initialized {
                break;
            }
        }

        assert!(saw_initialized);
        assert!(saw_status);
    }

    #[tokio::test]
    async fn joystick_registration_round_trips() {
        let (ds, _events) = DriverStation::new();
        ds.set_protocol(ProtocolKind::Frc2015);

        assert!(ds.register_joystick(4, 12, 1).await);
        assert!(!ds.register_joystick(0, 0, 0).await);
    }
}
