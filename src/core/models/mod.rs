pub mod credential;
pub mod usage;
