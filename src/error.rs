// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};
use crate::cuboid::codec::CompressionType;

/// Represents errors that can occur in the spatial cuboid store.
///
/// Every variant maps to one of the numeric error codes persisted in the
/// wire error payload (`Error::code`), so a caller that needs the legacy
/// integer code can still recover it.
#[derive(Debug)]
pub enum Error {
    /// Generic failure not covered by a more specific variant.
    Spdb(String),

    /// An operation that only makes sense on annotation channels was
    /// attempted on an image channel, or vice versa.
    DatatypeNotSupported(String),

    /// Reserved for forward compatibility; never raised by this crate.
    Future,

    /// I/O error surfaced by the KV cache or state store backing.
    Redis(std::io::Error),

    /// A page-in wait timed out, or a message arrived on the wrong channel.
    Async(String),

    /// Cuboid (de)serialization failed.
    Serialization(SerializationError),

    /// Two operands of an elementwise cuboid operation did not share a
    /// primitive type.
    DatatypeMismatch {
        /// The type the left-hand operand expected.
        expected: &'static str,
        /// The type that was actually supplied.
        got: &'static str,
    },

    /// The durable object store returned corrupt, missing, or otherwise
    /// unusable data.
    ObjectStore(String),

    /// The target channel is locked against writes.
    ResourceLocked(String),

    /// A write was attempted at a resolution other than the channel's
    /// base resolution.
    ResolutionMismatch {
        /// The channel's base (writable) resolution.
        base: u32,
        /// The resolution the caller attempted to write at.
        got: u32,
    },
}

/// Underlying cause of a [`Error::Serialization`].
#[derive(Debug)]
pub enum SerializationError {
    /// Failed to encode a value.
    Encode(EncodeError),
    /// Failed to decode a value.
    Decode(DecodeError),
    /// Decompression failed for the given compression type.
    Decompress(CompressionType),
    /// The checksum recorded in a cuboid's envelope did not match its
    /// decompressed contents.
    ChecksumMismatch,
}

impl Error {
    /// Returns the persisted numeric error code for this error.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Spdb(_) => 100,
            Self::DatatypeNotSupported(_) => 101,
            Self::Future => 102,
            Self::Redis(_) => 103,
            Self::Async(_) => 104,
            Self::Serialization(_) => 105,
            Self::DatatypeMismatch { .. } => 106,
            Self::ObjectStore(_) => 107,
            Self::ResourceLocked(_) => 108,
            Self::ResolutionMismatch { .. } => 109,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SpdbError[{}]: {self:?}", self.code())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Redis(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Serialization(SerializationError::Encode(value))
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Serialization(SerializationError::Decode(value))
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
