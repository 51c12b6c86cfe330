pub mod biquad;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod helpers;
pub mod instrument;
pub mod server;
pub mod service;
pub mod store;
pub mod store_manager;
