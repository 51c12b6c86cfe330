pub mod connection;
pub mod discovery;
pub mod hardware;
pub mod launcher;
pub mod measurement_csv;
