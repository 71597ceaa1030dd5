pub mod cancellation;
pub mod capability;
pub mod config;
pub mod event_bus;
pub mod store;

pub use cancellation::*;
pub use capability::*;
pub use config::*;
pub use event_bus::*;
pub use store::*;
