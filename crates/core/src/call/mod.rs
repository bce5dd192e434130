//! Call controller and its observable state

pub mod controller;
pub mod events;
pub mod state;

pub use controller::CallController;
pub use events::CallEvent;
pub use state::{CallState, EndReason};
