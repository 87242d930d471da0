//! Ban, maintenance and support-ticket handling.

mod error;

pub mod ban;
pub mod gate;
pub mod tickets;

pub use ban::{BanMonitor, BanState};
pub use error::{ModerationError, ModerationResult};
pub use gate::{MaintenanceNotice, ModerationGate, UiMode, select_mode};
pub use tickets::TicketDesk;

pub(crate) use ban::lift_ban;
