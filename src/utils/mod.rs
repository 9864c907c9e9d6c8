pub mod environment;
pub mod errors;
pub mod files;
pub mod keystore;
pub mod output;
pub mod paths;
pub mod prompt;

pub use environment::*;
pub use errors::*;
pub use files::*;
pub use output::*;
pub use paths::*;
