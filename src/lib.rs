pub mod auth;
pub mod catalog;
pub mod database;
pub mod db;
pub mod env;
pub mod error;
pub mod locks;
pub mod models;
pub mod overrides;
pub mod resolver;
pub mod service;
pub mod sharing;
pub mod tactics;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
mod test;

pub use error::AppError;
pub use service::FormationService;
