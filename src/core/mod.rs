pub mod builtin_servers;
pub mod config;
pub mod token_store;
