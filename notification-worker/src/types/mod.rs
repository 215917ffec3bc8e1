/// Environment configuration
pub mod environment;

pub use environment::Environment;
