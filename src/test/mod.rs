mod store;
pub mod utils;
