pub mod daemon;
pub mod service;
pub mod update;
pub mod update_all;
