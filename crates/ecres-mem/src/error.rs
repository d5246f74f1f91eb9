use thiserror::Error;

use ecres_core::error::FatalError;
use ecres_core::id::Resource;

/// Result type local to ecres-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no more {resource} available")]
    OutOfSlots { resource: Resource },

    #[error("{resource} pool needs a non-zero capacity")]
    ZeroCapacity { resource: Resource },

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<Error> for ecres_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::OutOfSlots { resource } => ecres_core::Error::Exhausted(resource),
            Error::ZeroCapacity { resource } => {
                ecres_core::Error::Config(format!("{resource} pool needs a non-zero capacity"))
            }
            Error::Fatal(f) => ecres_core::Error::Fatal(f),
        }
    }
}
