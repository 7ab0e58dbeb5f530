//! Save-state encoding
//!
//! States are a flat sequence of bincode values with fixed-width integers
//! and no header. Readers must decode the same types in the same order the
//! writer encoded them; [`encode_sentinel`]/[`decode_sentinel`] close the
//! sequence so a truncated stream is caught before anything is committed.
//! Decoded components are then checked with [`ensure`], so a corrupt value
//! is rejected before it can index past a table.

use std::io::{Read, Write};

use bincode::config::Config;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode state: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to decode state: {0}")]
    Decode(#[from] DecodeError),
    #[error("state is missing its end marker")]
    MissingSentinel,
    #[error("state field out of range: {0}")]
    Invalid(&'static str),
}

/// Fail with [`StateError::Invalid`] naming `field` unless `condition` holds
pub fn ensure(condition: bool, field: &'static str) -> Result<(), StateError> {
    if condition {
        Ok(())
    } else {
        Err(StateError::Invalid(field))
    }
}

fn config() -> impl Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Append one value to the stream
pub fn encode<T: Encode, W: Write>(writer: &mut W, value: &T) -> Result<(), StateError> {
    bincode::encode_into_std_write(value, writer, config())?;
    Ok(())
}

/// Read the next value from the stream
pub fn decode<T: Decode<()>, R: Read>(reader: &mut R) -> Result<T, StateError> {
    Ok(bincode::decode_from_std_read(reader, config())?)
}

pub fn encode_sentinel<W: Write>(writer: &mut W) -> Result<(), StateError> {
    encode(writer, &true)
}

pub fn decode_sentinel<R: Read>(reader: &mut R) -> Result<(), StateError> {
    match decode::<bool, R>(reader) {
        Ok(true) => Ok(()),
        Ok(false) => Err(StateError::MissingSentinel),
        Err(StateError::Decode(err)) if is_end_of_stream(&err) => Err(StateError::MissingSentinel),
        Err(err) => Err(err),
    }
}

fn is_end_of_stream(err: &DecodeError) -> bool {
    match err {
        DecodeError::UnexpectedEnd { .. } => true,
        DecodeError::Io { inner, .. } => inner.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
