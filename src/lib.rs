pub mod audit;
pub mod checkpoint;
pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod init;
pub mod intervention;
pub mod journal;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod procedure;
pub mod recovery;
pub mod server;
pub mod ui;
pub mod workers;
