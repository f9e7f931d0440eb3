//! The 2016 FRC communication protocol.
//!
//! Identical on the wire to the 2015 protocol; the only difference is the
//! robot address candidate list, which leads with the `-FRC` mDNS name that
//! season's roboRIO image registers.

use bytes::Bytes;

use crate::config::DsConfig;
use crate::joystick::JoystickRegistry;
use crate::proto::{Counters, Frc2015, Protocol};
use crate::util::ip_from_team;

pub struct Frc2016 {
    inner: Frc2015,
}

impl Frc2016 {
    pub fn new() -> Frc2016 {
        Frc2016 {
            inner: Frc2015::new(),
        }
    }
}

impl Default for Frc2016 {
    fn default() -> Frc2016 {
        Frc2016::new()
    }
}

impl Protocol for Frc2016 {
    fn name(&self) -> &'static str {
        "FRC 2016 Protocol"
    }

    fn fms_frequency(&self) -> u32 {
        self.inner.fms_frequency()
    }

    fn robot_frequency(&self) -> u32 {
        self.inner.robot_frequency()
    }

    fn fms_input_port(&self) -> Option<u16> {
        self.inner.fms_input_port()
    }

    fn fms_output_port(&self) -> Option<u16> {
        self.inner.fms_output_port()
    }

    fn robot_input_port(&self) -> Option<u16> {
        self.inner.robot_input_port()
    }

    fn robot_output_port(&self) -> Option<u16> {
        self.inner.robot_output_port()
    }

    fn netconsole_input_port(&self) -> Option<u16> {
        self.inner.netconsole_input_port()
    }

    fn default_radio_address(&self, team: u16) -> String {
        self.inner.default_radio_address(team)
    }

    fn default_robot_addresses(&self, team: u16) -> Vec<String> {
        vec![
            format!("roboRIO-{}-FRC.local", team),
            format!("roboRIO-{}.local", team),
            "172.22.11.2".to_string(),
            ip_from_team(team, 2),
        ]
    }

    fn reboot_robot(&mut self) {
        self.inner.reboot_robot();
    }

    fn restart_robot_code(&mut self) {
        self.inner.restart_robot_code();
    }

    fn on_robot_watchdog_expired(&mut self) {
        self.inner.on_robot_watchdog_expired();
    }

    fn fms_packet(&mut self, counters: &Counters, cfg: &DsConfig) -> Bytes {
        self.inner.fms_packet(counters, cfg)
    }

    fn robot_packet(
        &mut self,
        counters: &Counters,
        cfg: &DsConfig,
        joysticks: &JoystickRegistry,
    ) -> Bytes {
        self.inner.robot_packet(counters, cfg, joysticks)
    }

    fn interpret_fms_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
        self.inner.interpret_fms_packet(cfg, data)
    }

    fn interpret_robot_packet(&mut self, cfg: &mut DsConfig, data: &[u8]) -> bool {
        self.inner.interpret_robot_packet(cfg, data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn candidate_list_leads_with_the_frc_mdns_name() {
        let proto = Frc2016::new();
        assert_eq!(
            proto.default_robot_addresses(3794),
            vec![
                "roboRIO-3794-FRC.local",
                "roboRIO-3794.local",
                "172.22.11.2",
                "10.37.94.2"
            ]
        );
        assert_eq!(proto.default_radio_address(3794), "10.37.94.1");
    }

    #[test]
    fn wire_behavior_matches_2015() {
        use crate::joystick::JoystickRegistry;
        use crate::proto::Counters;
        use tokio::sync::mpsc::unbounded_channel;

        let (tx, _rx) = unbounded_channel();
        let cfg = DsConfig::new(tx);
        let joysticks = JoystickRegistry::new();
        let counters = Counters {
            sent_robot: 1,
            ..Counters::default()
        };

        let mut p2016 = Frc2016::new();
        let mut p2015 = Frc2015::new();
        assert_eq!(
            p2016.robot_packet(&counters, &cfg, &joysticks),
            p2015.robot_packet(&counters, &cfg, &joysticks)
        );
    }
}
