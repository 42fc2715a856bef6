pub mod config;
pub mod errors;
pub mod oracle;
pub mod settings;

pub use config::*;
pub use errors::*;
pub use oracle::*;
pub use settings::*;
