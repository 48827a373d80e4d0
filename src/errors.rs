pub mod classify;
pub mod error;

pub use error::{Error, ErrorKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;
