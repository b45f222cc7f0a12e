pub mod config;
pub mod db;
pub mod http;
pub mod logging;
