pub mod config;
pub mod error;
pub mod location;
pub mod logging;
pub mod storage;
pub mod weather_client;
