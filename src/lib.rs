pub mod config;
pub mod deploy;
pub mod deploy_log;
pub mod errors;
pub mod git;
pub mod locks;
pub mod logging;
pub mod notify;
pub mod project;
pub mod runner;
pub mod users;
pub mod web;
pub mod workdir;
