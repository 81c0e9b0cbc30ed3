pub mod auth;
pub mod config;
pub mod error;
pub mod formatter;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod process;
pub mod providers;
pub mod scheduler;
pub mod secrets;
pub mod store;
