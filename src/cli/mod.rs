pub mod config_cmd;
pub mod output;
pub mod renderer;
pub mod secret_cmd;
pub mod usage_cmd;
pub mod watch_cmd;
