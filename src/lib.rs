pub mod api;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
pub mod http;
pub mod lock;
pub mod platform;
pub mod selfupdate;
pub mod version;
