extern crate libds;

use libds::{DriverStation, Event, ProtocolKind};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (ds, mut events) = DriverStation::new();
    ds.set_team(3794);
    ds.set_protocol(ProtocolKind::Frc2016);
    ds.init();

    while let Some(event) = events.recv().await {
        match event {
            Event::StatusChanged(status) => println!("Status: {}", status),
            Event::VoltageChanged { formatted, .. } => println!("Battery: {}", formatted),
            Event::NewMessage(message) => print!("{}", message),
            _ => {}
        }
    }
}
