//! Binary form of a [`BuildDescription`]: an 8-byte header followed by CBOR.
//!
//! ```text
//! 0..4  b"SWBD"
//! 4..8  format version, little endian u32
//! 8..   ciborium-encoded description
//! ```
//!
//! Every map in the description is a `BTreeMap`, so equal descriptions
//! encode to equal bytes.

use super::BuildDescription;
use crate::error::SerialError;

pub const MAGIC: &[u8; 4] = b"SWBD";

/// Bumped whenever the encoded shape of [`BuildDescription`] changes.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

pub fn serialize(description: &BuildDescription) -> Result<Vec<u8>, SerialError> {
    let mut buffer = Vec::with_capacity(4096);
    buffer.extend_from_slice(MAGIC);
    buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    ciborium::into_writer(description, &mut buffer)?;
    Ok(buffer)
}

pub fn deserialize(bytes: &[u8]) -> Result<BuildDescription, SerialError> {
    let found = version(bytes)?;
    if found != FORMAT_VERSION {
        return Err(SerialError::Version {
            found,
            expected: FORMAT_VERSION,
        });
    }

    Ok(ciborium::from_reader(&bytes[HEADER_LEN..])?)
}

/// Reads the format version without decoding the body.
pub fn version(bytes: &[u8]) -> Result<u32, SerialError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(SerialError::BadMagic);
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..HEADER_LEN]);
    Ok(u32::from_le_bytes(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(matches!(deserialize(b"PK\x03\x04...."), Err(SerialError::BadMagic)));
        assert!(matches!(deserialize(b"SWB"), Err(SerialError::BadMagic)));
    }

    #[test]
    fn test_rejects_other_versions() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.push(0xa0);

        assert_eq!(version(&bytes).unwrap(), 7);
        match deserialize(&bytes) {
            Err(SerialError::Version { found, expected }) => {
                assert_eq!(found, 7);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
