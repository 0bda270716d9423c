//! `loco-middleware` – external velocity commands.
//!
//! The control loop polls a [`CommandSource`] once per iteration and never
//! waits on the network.  [`CommandClient`] is the WebSocket-backed source:
//! it runs its own I/O thread, accepts rosbridge-style `/cmd_vel` Twist
//! frames, and exposes only the most recent command.
//!
//! # Modules
//!
//! - [`source`] – the [`CommandSource`] trait and [`FixedCommand`].
//! - [`command_client`] – [`CommandClient`] and [`parse_command_frame`].

pub mod command_client;
pub mod source;

pub use command_client::{CommandClient, parse_command_frame};
pub use source::{CommandSource, FixedCommand};
