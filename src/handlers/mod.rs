pub mod clinical;
pub mod config;

pub use clinical::*;
pub use config::*;
