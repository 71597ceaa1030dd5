pub mod events;
pub mod requests;
pub mod responses;

pub use events::*;
pub use requests::*;
pub use responses::*;
