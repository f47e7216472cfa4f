//! Error type for the midibus umbrella crate.
//!
//! Wraps the member crates' errors so `?` works across both.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] midibus_io::Error),

    #[error("MIDI message: {0}")]
    Message(#[from] midibus_msg::MessageError),
}

pub type Result<T> = std::result::Result<T, Error>;
