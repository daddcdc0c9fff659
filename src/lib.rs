pub mod config;
pub mod dump;
pub mod process;
pub mod target;
pub mod version;
