pub mod connection;
pub mod delivery;
pub mod error;
pub mod registry;
