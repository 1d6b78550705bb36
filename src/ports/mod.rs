pub mod file_system;
pub mod loader;
