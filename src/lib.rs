pub mod cli;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod format;
pub mod queue;
pub mod runtime;
pub mod session;
pub mod state;
pub mod timing;

#[cfg(test)]
mod testutil;
