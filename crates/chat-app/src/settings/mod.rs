pub mod disabled_models;
pub mod state;
pub mod system;

pub use disabled_models::DisabledModels;
pub use state::{ClientSettings, ClientSettingsStore, SettingsError};
pub use system::SystemSettingsWatch;
