#[macro_use]
extern crate log;

pub mod bindings;
pub mod events;
pub mod ipc;
pub mod monitor;
pub mod window;
pub mod wm;
pub mod xconnection;

#[cfg(test)]
mod mock;

pub use wm::{Config, WindowManager};
pub use xconnection::{XConn, XcbConnection};
