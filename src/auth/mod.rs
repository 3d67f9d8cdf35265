pub mod actor;
pub mod permissions;

pub use actor::*;
pub use permissions::*;
