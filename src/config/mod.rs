mod hot_reload;
mod schema;

pub use hot_reload::ConfigHandle;
pub use schema::{
    BearConfig, Config, GmailConfig, NetworkConfig, NotificationConfig, ReliabilityConfig,
};
