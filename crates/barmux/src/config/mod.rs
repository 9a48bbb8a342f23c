pub mod bar_config;
pub mod upstream_config;

pub use bar_config::*;
