//! The control-loop engine: one task owning the sockets, the watchdogs, the
//! joystick registry and the configuration bus.
//!
//! Everything runs on a single `select!` loop, so state is never touched
//! concurrently: a received packet is fully interpreted (and its events
//! delivered) before the next timer tick runs, and within one robot tick the
//! send always happens before the scan cursor advances.

use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use tracing::{debug, trace};

use crate::config::{CommStatus, ControlMode, DsConfig, OperationStatus};
use crate::ds::Command;
use crate::event::Event;
use crate::joystick::JoystickRegistry;
use crate::netconsole::NetConsole;
use crate::proto::frc2015::{alliance_from_station, position_from_station};
use crate::proto::{ProtocolKind, Session};
use crate::sockets::{Channel, Datagram, Sockets};
use crate::watchdog::Watchdog;

/// Everything that can wake the engine loop up.
enum Wake {
    Command(Option<Command>),
    FmsTick,
    RadioTick,
    RobotTick,
    LossTick,
    ElapsedTick,
    FmsWatchdogExpired,
    RadioWatchdogExpired,
    RobotWatchdogExpired,
    Datagram(Datagram),
    ConsoleMessage(String),
}

pub(crate) struct Engine {
    cfg: DsConfig,
    joysticks: JoystickRegistry,
    sockets: Sockets,
    console: NetConsole,
    session: Option<Session>,
    fms_watchdog: Watchdog,
    radio_watchdog: Watchdog,
    robot_watchdog: Watchdog,
    custom_fms_address: String,
    custom_radio_address: String,
    custom_robot_address: String,
    fms_interval: Duration,
    radio_interval: Duration,
    robot_interval: Duration,
    packet_loss: u8,
    running: bool,
    initialized: bool,
    events: UnboundedSender<Event>,
}

impl Engine {
    pub(crate) fn new(events: UnboundedSender<Event>) -> Engine {
        Engine {
            cfg: DsConfig::new(events.clone()),
            joysticks: JoystickRegistry::new(),
            sockets: Sockets::new(),
            console: NetConsole::new(),
            session: None,
            fms_watchdog: Watchdog::new(Duration::from_millis(1000)),
            radio_watchdog: Watchdog::new(Duration::from_millis(1000)),
            robot_watchdog: Watchdog::new(Duration::from_millis(1000)),
            custom_fms_address: String::new(),
            custom_radio_address: String::new(),
            custom_robot_address: String::new(),
            fms_interval: Duration::from_millis(1000),
            radio_interval: Duration::from_millis(1000),
            robot_interval: Duration::from_millis(1000),
            packet_loss: 0,
            running: false,
            initialized: false,
            events,
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        let mut fms_timer = interval(self.fms_interval);
        let mut radio_timer = interval(self.radio_interval);
        let mut robot_timer = interval(self.robot_interval);
        let mut loss_timer = interval(Duration::from_millis(250));
        let mut elapsed_timer = interval(Duration::from_millis(100));

        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                _ = fms_timer.tick() => Wake::FmsTick,
                _ = radio_timer.tick() => Wake::RadioTick,
                _ = robot_timer.tick() => Wake::RobotTick,
                _ = loss_timer.tick() => Wake::LossTick,
                _ = elapsed_timer.tick() => Wake::ElapsedTick,
                _ = self.fms_watchdog.wait() => Wake::FmsWatchdogExpired,
                _ = self.radio_watchdog.wait() => Wake::RadioWatchdogExpired,
                _ = self.robot_watchdog.wait() => Wake::RobotWatchdogExpired,
                datagram = self.sockets.recv() => Wake::Datagram(datagram),
                message = self.console.recv() => Wake::ConsoleMessage(message),
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => {
                    if self.handle_command(command).await {
                        // The protocol changed; pick up the new send rates.
                        fms_timer = interval(self.fms_interval);
                        radio_timer = interval(self.radio_interval);
                        robot_timer = interval(self.robot_interval);
                    }
                }
                Wake::FmsTick => self.fms_tick().await,
                Wake::RadioTick => self.radio_tick().await,
                Wake::RobotTick => self.robot_tick().await,
                Wake::LossTick => self.update_packet_loss(),
                Wake::ElapsedTick => self.cfg.tick_elapsed(),
                Wake::FmsWatchdogExpired => {
                    self.fms_watchdog.halt();
                    self.reset_fms();
                }
                Wake::RadioWatchdogExpired => {
                    self.radio_watchdog.halt();
                    self.reset_radio();
                }
                Wake::RobotWatchdogExpired => {
                    self.robot_watchdog.halt();
                    self.reset_robot();
                }
                Wake::Datagram(datagram) => self.handle_datagram(datagram),
                Wake::ConsoleMessage(message) => self.emit(Event::NewMessage(message)),
            }
        }
    }

    /// Applies one operator command. Returns whether the send intervals
    /// changed and the loop timers must be rebuilt.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Init => self.init(),
            Command::Start => {
                self.running = true;
                debug!("DS networking operations resumed");
            }
            Command::Stop => {
                self.running = false;
                debug!("DS networking operations inhibited");
            }
            Command::SetTeam(team) => {
                self.cfg.set_team(team);
                self.update_addresses();
            }
            Command::SetAlliance(alliance) => self.cfg.set_alliance(alliance),
            Command::SetPosition(position) => self.cfg.set_position(position),
            Command::SetTeamStation(station) => {
                if station <= 5 {
                    self.cfg.set_alliance(alliance_from_station(station));
                    self.cfg.set_position(position_from_station(station));
                }
            }
            Command::SetControlMode(mode) => self.cfg.set_control_mode(mode),
            Command::SetEnabled(enabled) => self.cfg.set_enabled(enabled),
            Command::SetOperationStatus(status) => self.cfg.set_operation_status(status),
            Command::SetProtocol(kind) => {
                self.apply_protocol(kind).await;
                return true;
            }
            Command::SetCustomFmsAddress(address) => {
                self.custom_fms_address = address;
                self.update_addresses();
            }
            Command::SetCustomRadioAddress(address) => {
                self.custom_radio_address = address;
                self.update_addresses();
            }
            Command::SetCustomRobotAddress(address) => {
                self.custom_robot_address = address;
                self.update_addresses();
            }
            Command::RegisterJoystick {
                axes,
                buttons,
                povs,
                reply,
            } => {
                let _ = reply.send(self.register_joystick(axes, buttons, povs));
            }
            Command::RemoveJoystick(index) => self.remove_joystick(index),
            Command::ResetJoysticks => self.reset_joysticks(),
            Command::UpdateAxis { stick, axis, value } => {
                self.joysticks.update_axis(stick, axis, value)
            }
            Command::UpdateButton {
                stick,
                button,
                pressed,
            } => self.joysticks.update_button(stick, button, pressed),
            Command::UpdatePov { stick, pov, angle } => {
                self.joysticks.update_pov(stick, pov, angle)
            }
            Command::RebootRobot => {
                if let Some(session) = &mut self.session {
                    session.protocol.reboot_robot();
                    debug!("robot reboot requested");
                }
            }
            Command::RestartRobotCode => {
                if let Some(session) = &mut self.session {
                    session.protocol.restart_robot_code();
                    debug!("robot code restart requested");
                }
            }
            Command::SendConsoleMessage(message) => self.console.send_message(&message).await,
            Command::SetScanRate(rate) => self.sockets.set_scan_rate(rate),
            Command::SetSimulated(simulated) => self.cfg.set_simulated(simulated),
            Command::SetLibVersion(version) => self.cfg.set_lib_version(version),
            Command::SetPcmVersion(version) => self.cfg.set_pcm_version(version),
            Command::SetPdpVersion(version) => self.cfg.set_pdp_version(version),
        }

        false
    }

    fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        self.reset_fms();
        self.reset_radio();
        self.reset_robot();
        self.emit(Event::Initialized);
        self.cfg.emit_status();
        debug!("DS engine started");
    }

    /// Tears the current protocol down and brings the new one up: socket
    /// types and ports, NetConsole, send intervals, watchdog expirations,
    /// joystick limits and applied addresses.
    async fn apply_protocol(&mut self, kind: ProtocolKind) {
        self.running = false;

        if let Some(old) = self.session.take() {
            debug!("protocol {} decommissioned", old.protocol.name());
        }

        let protocol = kind.create();
        debug!("configuring protocol {}", protocol.name());

        self.sockets
            .set_fms_socket_type(protocol.fms_socket_type())
            .await;
        self.sockets
            .set_radio_socket_type(protocol.radio_socket_type())
            .await;
        self.sockets
            .set_robot_socket_type(protocol.robot_socket_type())
            .await;

        self.sockets
            .set_fms_input_port(protocol.fms_input_port())
            .await;
        self.sockets.set_fms_output_port(protocol.fms_output_port());
        self.sockets
            .set_radio_input_port(protocol.radio_input_port())
            .await;
        self.sockets
            .set_radio_output_port(protocol.radio_output_port());
        self.sockets
            .set_robot_input_port(protocol.robot_input_port())
            .await;
        self.sockets
            .set_robot_output_port(protocol.robot_output_port());

        self.console
            .set_input_port(protocol.netconsole_input_port())
            .await;
        self.console
            .set_output_port(protocol.netconsole_output_port())
            .await;

        self.fms_interval = send_interval(protocol.fms_frequency());
        self.radio_interval = send_interval(protocol.radio_frequency());
        self.robot_interval = send_interval(protocol.robot_frequency());

        self.fms_watchdog
            .set_expiration_time(watchdog_interval(protocol.fms_frequency()));
        self.radio_watchdog
            .set_expiration_time(watchdog_interval(protocol.radio_frequency()));
        self.robot_watchdog
            .set_expiration_time(watchdog_interval(protocol.robot_frequency()));

        debug!(
            "send interval {:?}, watchdog expiration {:?}",
            self.robot_interval,
            self.robot_watchdog.expiration_time()
        );

        self.joysticks.reconfigure(&protocol.joystick_caps());
        self.emit(Event::JoystickCountChanged(self.joysticks.count()));

        self.session = Some(Session::new(protocol));
        self.update_addresses();

        self.running = true;
        self.reset_fms();
        self.reset_radio();
        self.reset_robot();

        self.emit(Event::ProtocolChanged);
    }

    /// Re-applies the FMS, radio and robot addresses from the user overrides
    /// and the protocol defaults, and regenerates the scan candidate list.
    fn update_addresses(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let team = self.cfg.team();
        let protocol = &session.protocol;

        self.sockets.set_fms_address(self.custom_fms_address.clone());

        let radio = if self.custom_radio_address.is_empty() {
            protocol.default_radio_address(team)
        } else {
            self.custom_radio_address.clone()
        };
        self.sockets.set_radio_address(radio);

        // An empty robot address engages scan mode over the candidate list.
        self.sockets
            .set_robot_address(self.custom_robot_address.clone());
        self.sockets
            .set_address_list(protocol.default_robot_addresses(team));
    }

    fn register_joystick(&mut self, axes: usize, buttons: usize, povs: usize) -> bool {
        let caps = self
            .session
            .as_ref()
            .map(|s| s.protocol.joystick_caps())
            .unwrap_or_default();

        let registered = self.joysticks.register(axes, buttons, povs, &caps);
        if registered {
            self.emit(Event::JoystickCountChanged(self.joysticks.count()));
        }
        registered
    }

    fn remove_joystick(&mut self, index: usize) {
        if self.joysticks.remove(index) {
            self.disable_if_sticks_required();
            self.emit(Event::JoystickCountChanged(self.joysticks.count()));
        }
    }

    fn reset_joysticks(&mut self) {
        self.joysticks.clear();
        self.disable_if_sticks_required();
        self.emit(Event::JoystickCountChanged(0));
    }

    /// Losing the last joystick while teleoperated takes the robot to
    /// disabled; a driver without inputs must not leave outputs live. The
    /// FMS keeps authority over the enabled state when attached.
    fn disable_if_sticks_required(&mut self) {
        if self.joysticks.count() == 0
            && self.cfg.control_mode() == ControlMode::Teleoperated
            && !self.cfg.is_connected_to_fms()
        {
            self.cfg.set_enabled(false);
        }
    }

    async fn fms_tick(&mut self) {
        if !self.running || !self.cfg.is_connected_to_fms() {
            return;
        }

        let Some(session) = &mut self.session else {
            return;
        };

        let data = session.generate_fms_packet(&self.cfg);
        if !data.is_empty() {
            self.sockets.send_to_fms(&data).await;
        }
    }

    async fn radio_tick(&mut self) {
        if !self.running {
            return;
        }

        let Some(session) = &mut self.session else {
            return;
        };

        let data = session.generate_radio_packet(&self.cfg);
        if !data.is_empty() {
            self.sockets.send_to_radio(&data).await;
        }
    }

    async fn robot_tick(&mut self) {
        if !self.running {
            return;
        }

        let Some(session) = &mut self.session else {
            return;
        };

        let data = session.generate_robot_packet(&self.cfg, &self.joysticks);
        if !data.is_empty() {
            self.sockets.send_to_robot(&data).await;
        }

        // The cursor advances only after the window was probed.
        self.sockets.refresh_address_list();
    }

    /// Routes a received datagram to the protocol. Only a cleanly parsed
    /// packet feeds the channel's watchdog; malformed datagrams change
    /// nothing.
    fn handle_datagram(&mut self, datagram: Datagram) {
        if !self.running {
            return;
        }

        let Some(session) = &mut self.session else {
            return;
        };

        trace!(
            "{:?} datagram ({} bytes) from {}",
            datagram.channel,
            datagram.data.len(),
            datagram.from
        );

        match datagram.channel {
            Channel::Fms => {
                if session.read_fms_packet(&mut self.cfg, &datagram.data) {
                    self.fms_watchdog.reset();
                }
            }
            Channel::Radio => {
                if session.read_radio_packet(&mut self.cfg, &datagram.data) {
                    self.radio_watchdog.reset();
                }
            }
            Channel::Robot => {
                if session.read_robot_packet(&mut self.cfg, &datagram.data) {
                    self.robot_watchdog.reset();
                }
            }
        }
    }

    fn reset_fms(&mut self) {
        if let Some(session) = &mut self.session {
            session.protocol.on_fms_watchdog_expired();
        }

        self.cfg.set_fms_comm_status(CommStatus::Failing);
    }

    fn reset_radio(&mut self) {
        if let Some(session) = &mut self.session {
            session.protocol.on_radio_watchdog_expired();
        }

        self.cfg.set_radio_comm_status(CommStatus::Failing);
    }

    /// The robot-loss cascade: everything the robot reported is forgotten
    /// and the one-shot request flags are dropped, so a reconnecting robot
    /// starts from a clean slate.
    fn reset_robot(&mut self) {
        if let Some(session) = &mut self.session {
            session.reset_loss_counter();
            session.protocol.on_robot_watchdog_expired();
        }

        self.cfg.set_voltage(0.0);
        self.cfg.set_simulated(false);
        self.cfg.set_enabled(false);
        self.cfg.set_operation_status(OperationStatus::Normal);
        self.cfg.set_brownout(false);
        self.cfg.set_robot_code(false);
        self.cfg.set_robot_comm_status(CommStatus::Failing);

        self.cfg.emit_status();
    }

    /// Rolling packet loss over the packets exchanged since the last robot
    /// reconnect.
    fn update_packet_loss(&mut self) {
        let (sent, received) = match &self.session {
            Some(session) => (
                session.counters.sent_robot_since_connect,
                session.counters.recv_robot_since_connect,
            ),
            None => (0, 0),
        };

        let loss = if received == 0 && !self.cfg.is_connected_to_robot() {
            100.0
        } else if sent > 0 && received > 0 {
            (1.0 - f64::from(received) / f64::from(sent)) * 100.0
        } else {
            0.0
        };

        self.packet_loss = loss as u8;
        trace!("packet loss at {}%", self.packet_loss);
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Send period for a packet frequency, shrunk by 10% to compensate for host
/// scheduling jitter.
fn send_interval(frequency: u32) -> Duration {
    let nominal = (1000 / frequency.max(1)).max(1);
    Duration::from_millis((f64::from(nominal) * 0.9) as u64)
}

/// Watchdog expiration for a packet frequency: 50 missed send slots.
fn watchdog_interval(frequency: u32) -> Duration {
    let nominal = (1000 / frequency.max(1)).max(1);
    Duration::from_millis(u64::from(nominal) * 50)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Alliance, EnableStatus, Position};
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    async fn engine(kind: ProtocolKind) -> (Engine, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        let mut engine = Engine::new(tx);
        engine.apply_protocol(kind).await;
        (engine, rx)
    }

    fn connect_robot(engine: &mut Engine) {
        let reply = [0x00, 0x01, 0x01, 0x00, 0x20, 12, 180, 0x00];
        let session = engine.session.as_mut().unwrap();
        assert!(session.read_robot_packet(&mut engine.cfg, &reply));
    }

    #[test]
    fn intervals_follow_the_protocol_frequencies() {
        assert_eq!(send_interval(50), Duration::from_millis(18));
        assert_eq!(send_interval(2), Duration::from_millis(450));
        assert_eq!(watchdog_interval(50), Duration::from_millis(1000));
        assert_eq!(watchdog_interval(2), Duration::from_millis(25_000));
    }

    #[tokio::test]
    async fn removing_the_last_joystick_in_teleop_disables() {
        let (mut engine, _rx) = engine(ProtocolKind::Frc2015).await;
        assert!(engine.register_joystick(4, 12, 1));

        engine.cfg.set_control_mode(ControlMode::Teleoperated);
        connect_robot(&mut engine);
        engine.cfg.set_enabled(true);

        engine.remove_joystick(0);
        assert!(!engine.cfg.is_enabled());

        // The next robot packet carries a cleared enabled bit.
        let session = engine.session.as_mut().unwrap();
        let packet = session.generate_robot_packet(&engine.cfg, &engine.joysticks);
        assert_eq!(packet[3] & 0x04, 0);
    }

    #[tokio::test]
    async fn removing_a_joystick_outside_teleop_keeps_enable() {
        let (mut engine, _rx) = engine(ProtocolKind::Frc2015).await;
        assert!(engine.register_joystick(4, 12, 1));

        engine.cfg.set_control_mode(ControlMode::Autonomous);
        connect_robot(&mut engine);
        engine.cfg.set_enabled(true);

        engine.remove_joystick(0);
        assert!(engine.cfg.is_enabled());
    }

    #[tokio::test]
    async fn watchdog_cascade() {
        let (mut engine, mut rx) = engine(ProtocolKind::Frc2015).await;
        connect_robot(&mut engine);
        engine.cfg.set_enabled(true);
        while rx.try_recv().is_ok() {}

        engine.reset_robot();

        assert_eq!(engine.cfg.voltage(), 0.0);
        assert!(!engine.cfg.is_enabled());
        assert!(!engine.cfg.is_connected_to_robot());
        assert!(!engine.cfg.is_robot_code_running());
        assert!(!engine.cfg.is_emergency_stopped());
        assert!(!engine.cfg.is_voltage_brownout());
        assert!(!engine.cfg.is_simulated());

        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&Event::EnabledChanged(EnableStatus::Disabled)));
        assert!(events.contains(&Event::RobotCommStatusChanged(CommStatus::Failing)));
        assert!(events.contains(&Event::StatusChanged("No Robot Communication".to_string())));

        // The next robot packet's request byte drops back to "not connected".
        let session = engine.session.as_mut().unwrap();
        let packet = session.generate_robot_packet(&engine.cfg, &engine.joysticks);
        assert_eq!(packet[4], 0x00);
    }

    #[tokio::test]
    async fn protocol_hotswap_reconfigures_joysticks() {
        let (mut engine, _rx) = engine(ProtocolKind::Frc2015).await;
        assert!(engine.register_joystick(8, 20, 2));

        engine.apply_protocol(ProtocolKind::Frc2014).await;

        let stick = engine.joysticks.get(0).unwrap();
        assert_eq!(stick.real_axes, 8);
        assert_eq!(stick.real_buttons, 20);
        assert_eq!(stick.real_povs, 2);
        assert_eq!(stick.num_axes(), 6);
        assert_eq!(stick.num_buttons(), 12);
        assert_eq!(stick.num_povs(), 0);
    }

    #[tokio::test]
    async fn packet_loss_is_pinned_while_disconnected() {
        let (mut engine, _rx) = engine(ProtocolKind::Frc2015).await;

        for _ in 0..50 {
            let session = engine.session.as_mut().unwrap();
            session.generate_robot_packet(&engine.cfg, &engine.joysticks);
        }
        engine.update_packet_loss();
        assert_eq!(engine.packet_loss, 100);

        connect_robot(&mut engine);
        let session = engine.session.as_mut().unwrap();
        for _ in 0..10 {
            session.generate_robot_packet(&engine.cfg, &engine.joysticks);
        }
        let reply = [0x00, 0x02, 0x01, 0x00, 0x20, 12, 180, 0x00];
        for _ in 0..8 {
            let session = engine.session.as_mut().unwrap();
            session.read_robot_packet(&mut engine.cfg, &reply);
        }

        engine.update_packet_loss();
        assert_eq!(engine.packet_loss, 10);
    }

    #[tokio::test]
    async fn custom_robot_address_is_order_independent() {
        // Clearing the custom address before or after selecting the protocol
        // must land on the same applied address.
        let (tx, _rx) = unbounded_channel();
        let mut first = Engine::new(tx);
        first.custom_robot_address = String::new();
        first.apply_protocol(ProtocolKind::Frc2016).await;

        let (tx, _rx) = unbounded_channel();
        let mut second = Engine::new(tx);
        second.apply_protocol(ProtocolKind::Frc2016).await;
        second.custom_robot_address = String::new();
        second.update_addresses();

        assert_eq!(
            first.sockets.robot_address(),
            second.sockets.robot_address()
        );
        assert_eq!(first.sockets.robot_address(), "");
    }

    #[tokio::test]
    async fn team_station_codes_set_alliance_and_position() {
        let (mut engine, _rx) = engine(ProtocolKind::Frc2015).await;

        engine.handle_command(Command::SetTeamStation(4)).await;
        assert_eq!(engine.cfg.alliance(), Alliance::Blue);
        assert_eq!(engine.cfg.position(), Position::Position2);

        engine.handle_command(Command::SetTeamStation(9)).await;
        assert_eq!(engine.cfg.alliance(), Alliance::Blue);
        assert_eq!(engine.cfg.position(), Position::Position2);
    }
}
