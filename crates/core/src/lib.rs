pub mod config;
pub mod entity;
pub mod instance;
pub mod time;

pub use config::Config;
pub use entity::*;
pub use instance::*;
