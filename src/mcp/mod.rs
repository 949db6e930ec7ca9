pub mod client;
pub mod error;
pub mod facade;
pub mod manager;
pub mod provisioning;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
