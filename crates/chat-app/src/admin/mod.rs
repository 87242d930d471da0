mod error;

pub mod god_mode;

pub use error::{AdminError, AdminResult};
pub use god_mode::{GodModeConsole, god_image_path};
