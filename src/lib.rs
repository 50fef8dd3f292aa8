pub mod app;
pub mod config;
pub mod constants;
pub mod logging;
pub mod services;
pub mod store;
pub mod workers;
