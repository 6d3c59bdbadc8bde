//! Side-effecting services used by the drivers.

pub mod archive;
pub mod config;
pub mod contract;
pub mod deps;
pub mod lock;
pub mod notify;
pub mod paths;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod worker;
