pub mod state;

pub use state::{
    ClientSettings, ENV_PREFIX, SETTINGS_FILE_NAME, SettingsError, SettingsResult, SettingsStore,
};
