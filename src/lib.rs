pub mod config;
pub mod dta;
pub mod history;
pub mod logging;
pub mod manifest;
pub mod memory;
pub mod process;
pub mod stack;
