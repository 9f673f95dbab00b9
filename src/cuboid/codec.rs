// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk/on-wire envelope for a serialized cuboid (§4.1, §4.4 object
//! values): a small magic-prefixed header carrying the compression type
//! and a content checksum, followed by the (possibly compressed) byte
//! payload.

use crate::checksum::Checksum;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::{Error, SerializationError};
use crate::file::MAGIC_BYTES;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression applied to a cuboid's serialized payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompressionType {
    /// Stored uncompressed.
    None,

    /// LZ4 block compression.
    #[cfg(feature = "lz4")]
    Lz4,
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::None => writer.write_u8(0)?,

            #[cfg(feature = "lz4")]
            Self::Lz4 => writer.write_u8(1)?,
        }

        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;

        match tag {
            0 => Ok(Self::None),

            #[cfg(feature = "lz4")]
            1 => Ok(Self::Lz4),

            tag => Err(DecodeError::InvalidTag(("CompressionType", tag))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",
            }
        )
    }
}

/// Fixed-size header prefixing every serialized cuboid payload.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Header {
    compression: CompressionType,
    checksum: Checksum,
    data_length: u32,
    uncompressed_length: u32,
}

impl Encode for Header {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&MAGIC_BYTES)?;
        self.compression.encode_into(writer)?;
        writer.write_u128::<BigEndian>(self.checksum.into_u128())?;
        writer.write_u32::<BigEndian>(self.data_length)?;
        writer.write_u32::<BigEndian>(self.uncompressed_length)?;
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("Cuboid"));
        }

        let compression = CompressionType::decode_from(reader)?;
        let checksum = Checksum::from_raw(reader.read_u128::<BigEndian>()?);
        let data_length = reader.read_u32::<BigEndian>()?;
        let uncompressed_length = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            compression,
            checksum,
            data_length,
            uncompressed_length,
        })
    }
}

/// Wraps `payload` (the raw little-endian element bytes of a cuboid) in a
/// header and compresses it with `compression`.
pub fn to_blosc(payload: &[u8], compression: CompressionType) -> Vec<u8> {
    let checksum = Checksum::of(payload);

    let compressed = match compression {
        CompressionType::None => payload.to_vec(),

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => lz4_flex::compress(payload),
    };

    let header = Header {
        compression,
        checksum,
        #[allow(clippy::cast_possible_truncation)]
        data_length: compressed.len() as u32,
        #[allow(clippy::cast_possible_truncation)]
        uncompressed_length: payload.len() as u32,
    };

    let mut out = header.encode_into_vec();
    out.extend_from_slice(&compressed);
    out
}

/// Inverse of [`to_blosc`]: validates the header magic and checksum and
/// returns the decompressed payload.
pub fn from_blosc(bytes: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(bytes);
    let header = Header::decode_from(&mut cursor)?;
    let body = &bytes[cursor.position() as usize..];

    let decompressed = match header.compression {
        CompressionType::None => body.to_vec(),

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => {
            lz4_flex::decompress(body, header.uncompressed_length as usize).map_err(|_| {
                Error::Serialization(SerializationError::Decompress(header.compression))
            })?
        }
    };

    if Checksum::of(&decompressed) != header.checksum {
        return Err(Error::Serialization(SerializationError::ChecksumMismatch));
    }

    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip_uncompressed() {
        let payload = b"some cuboid bytes, not actually little-endian voxels";
        let wire = to_blosc(payload, CompressionType::None);
        let back = from_blosc(&wire).unwrap();
        assert_eq!(back, payload);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn roundtrip_lz4() {
        let payload = vec![7u8; 4096];
        let wire = to_blosc(&payload, CompressionType::Lz4);
        assert!(wire.len() < payload.len());
        let back = from_blosc(&wire).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut wire = to_blosc(b"abc", CompressionType::None);
        wire[0] = b'X';
        assert!(from_blosc(&wire).is_err());
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut wire = to_blosc(b"abcdefgh", CompressionType::None);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            from_blosc(&wire),
            Err(Error::Serialization(SerializationError::ChecksumMismatch))
        ));
    }
}
