pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod permissions;
pub mod server;
pub mod telemetry;
pub mod ws;
