pub mod action;
pub mod backend;
pub mod cloud;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod io;
pub mod paths;
pub mod process;
pub mod registry;
pub mod report;
pub mod run_config;
pub mod symphony;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, RoverError};
