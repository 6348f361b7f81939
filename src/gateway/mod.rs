pub mod client;
pub mod envelope;
pub mod relay;
pub mod rest;
pub mod server;
