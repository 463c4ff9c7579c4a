pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod interval;
pub mod utils;
