pub mod interactive;
pub mod local;
pub mod remote;
