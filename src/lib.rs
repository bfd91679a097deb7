pub mod auth;
pub mod config;
pub mod helpers;
pub mod process;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod system;

#[cfg(test)]
pub(crate) mod testenv;
