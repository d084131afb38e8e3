/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static::lazy_static! {
    /// Default outer deadline for user-facing game calls, in seconds
    pub static ref REQUESTS_TIMEOUT: u64 = match std::env::var("SEKAI_REQUESTS_TIMEOUT") {
        Ok(timeout) => timeout.parse().unwrap_or(45),
        Err(_) => 45
    };
}

pub mod region;
pub mod version;
pub mod config;
pub mod error;
pub mod codec;
pub mod client;
pub mod updater;
pub mod scheduler;
pub mod bootstrap;

pub mod prelude {
    pub use super::region::{Family, Region};
    pub use super::version::{is_newer, Version};
    pub use super::config::Config;
    pub use super::error::{ApiError, ApiStatus, FailedResponse};
    pub use super::codec::{Codec, CodecError, OrderedMap};
    pub use super::client::{Account, Deadline, GameClient, LoginResponse, RegionManager};
    pub use super::updater::{AppHashUpdater, GitPusher};
    pub use super::scheduler::UpdaterScheduler;
    pub use super::bootstrap::AppState;
}
