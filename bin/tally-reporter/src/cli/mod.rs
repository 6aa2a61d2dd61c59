mod config;
pub use self::config::handle_config_command;

mod run;
pub use self::run::handle_run_command;
