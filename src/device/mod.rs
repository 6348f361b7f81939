pub mod connection;
pub mod constants;
pub mod session;
pub mod simulated;
pub mod transport;
pub mod types;
