//! A client library implementing the FRC Driver Station side of the
//! field communication protocols.
//!
//! The crate keeps a robot controller alive by exchanging periodic UDP
//! datagrams carrying operator inputs, operating mode, alliance station and
//! diagnostic commands, while decoding robot status (battery, code presence,
//! brownout, emergency stop) from the replies.
//!
//! The entry point is [`DriverStation`], which owns a background engine task
//! driving the send loops, the watchdogs and the socket scanning. State
//! changes are published on an [`Event`] stream:
//!
//! ```no_run
//! use libds::{DriverStation, ProtocolKind};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (ds, mut events) = DriverStation::new();
//!     ds.set_team(3794);
//!     ds.set_protocol(ProtocolKind::Frc2016);
//!     ds.init();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

#[macro_use]
extern crate bitflags;

mod ds;
mod elapsed;
mod ext;
mod netconsole;
mod sockets;
mod util;
mod watchdog;

pub mod config;
pub mod event;
pub mod joystick;
pub mod proto;

pub use self::config::{
    Alliance, CodeStatus, CommStatus, ControlMode, DsConfig, EnableStatus, OperationStatus,
    Position, VoltageStatus,
};
pub use self::ds::DriverStation;
pub use self::event::Event;
pub use self::joystick::Joystick;
pub use self::proto::{Protocol, ProtocolKind};
pub use self::sockets::SocketType;

pub type Result<T> = anyhow::Result<T>;
