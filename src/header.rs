//! Request and response header codec.
//!
//! Both frames are fixed-layout little-endian and occupy the reserved prefix
//! of the handle's input/output buffer; the user payload follows.
//!
//! Request header (24 bytes):
//! ```text
//! Offset  Size  Field
//! 0       4     magic
//! 4       1     version
//! 5       1     flags
//! 6       2     reserved (zero)
//! 8       4     operation id
//! 12      4     cookie
//! 16      8     extra-bulk handle (0 = none)
//! ```
//!
//! Response header (16 bytes):
//! ```text
//! Offset  Size  Field
//! 0       4     magic
//! 4       1     version
//! 5       3     reserved (zero)
//! 8       4     cookie
//! 12      4     return code
//! ```

use bitflags::bitflags;

use crate::error::{Error, ProtocolError, Result};
use crate::registry::RpcId;

/// Magic number identifying narpc frames.
pub const HEADER_MAGIC: u32 = 0x4E41_5250;

/// Wire protocol version.
pub const HEADER_VERSION: u8 = 1;

/// Encoded request header size in bytes.
pub const REQUEST_HEADER_SIZE: usize = 24;

/// Encoded response header size in bytes.
pub const RESPONSE_HEADER_SIZE: usize = 16;

bitflags! {
    /// Request header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u8 {
        /// The extra-bulk field carries a descriptor for oversized arguments.
        const EXTRA_BULK = 0b0000_0001;
    }
}

/// Header framing an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Protocol magic as read from or written to the wire.
    pub magic: u32,
    /// Protocol version.
    pub version: u8,
    /// Flag bits.
    pub flags: RequestFlags,
    /// Operation id (hash of the registered function name).
    pub id: RpcId,
    /// Per-call nonce copied into the response for correlation.
    pub cookie: u32,
    /// Bulk descriptor for oversized arguments, 0 when absent.
    pub extra_bulk: u64,
}

impl RequestHeader {
    /// Create a header for the current protocol version.
    pub fn new(id: RpcId, cookie: u32, extra_bulk: u64) -> Self {
        let flags = if extra_bulk != 0 {
            RequestFlags::EXTRA_BULK
        } else {
            RequestFlags::empty()
        };
        Self {
            magic: HEADER_MAGIC,
            version: HEADER_VERSION,
            flags,
            id,
            cookie,
            extra_bulk,
        }
    }

    /// Write the frame into the buffer prefix.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(Error::Size {
                expected: REQUEST_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.version;
        buf[5] = self.flags.bits();
        buf[6..8].copy_from_slice(&[0u8; 2]);
        buf[8..12].copy_from_slice(&self.id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cookie.to_le_bytes());
        buf[16..24].copy_from_slice(&self.extra_bulk.to_le_bytes());
        Ok(())
    }

    /// Read the frame from the buffer prefix.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(Error::Size {
                expected: REQUEST_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: buf[4],
            flags: RequestFlags::from_bits_retain(buf[5]),
            id: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            cookie: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            extra_bulk: u64::from_le_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        })
    }

    /// Check magic and version.
    pub fn verify(&self) -> Result<()> {
        verify_frame(self.magic, self.version)
    }
}

/// Header framing an outgoing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Protocol magic as read from or written to the wire.
    pub magic: u32,
    /// Protocol version.
    pub version: u8,
    /// Cookie copied from the request being answered.
    pub cookie: u32,
    /// Carried return code.
    pub ret_code: u32,
}

impl ResponseHeader {
    /// Create a header answering the request identified by `cookie`.
    pub fn new(cookie: u32) -> Self {
        Self {
            magic: HEADER_MAGIC,
            version: HEADER_VERSION,
            cookie,
            ret_code: 0,
        }
    }

    /// Write the frame into the buffer prefix.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(Error::Size {
                expected: RESPONSE_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.version;
        buf[5..8].copy_from_slice(&[0u8; 3]);
        buf[8..12].copy_from_slice(&self.cookie.to_le_bytes());
        buf[12..16].copy_from_slice(&self.ret_code.to_le_bytes());
        Ok(())
    }

    /// Read the frame from the buffer prefix.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(Error::Size {
                expected: RESPONSE_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: buf[4],
            cookie: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            ret_code: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Check magic and version.
    pub fn verify(&self) -> Result<()> {
        verify_frame(self.magic, self.version)
    }
}

fn verify_frame(magic: u32, version: u8) -> Result<()> {
    if magic != HEADER_MAGIC {
        return Err(Error::Protocol(ProtocolError::BadMagic {
            expected: HEADER_MAGIC,
            got: magic,
        }));
    }
    if version != HEADER_VERSION {
        return Err(Error::Protocol(ProtocolError::BadVersion {
            expected: HEADER_VERSION,
            got: version,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_roundtrip() {
        let hdr = RequestHeader::new(0xDEAD_BEEF, 42, 7);
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        hdr.encode(&mut buf).unwrap();

        let decoded = RequestHeader::decode(&buf).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.id, 0xDEAD_BEEF);
        assert_eq!(decoded.cookie, 42);
        assert_eq!(decoded.extra_bulk, 7);
        assert!(decoded.flags.contains(RequestFlags::EXTRA_BULK));
        decoded.verify().unwrap();
    }

    #[test]
    fn test_request_header_without_bulk_has_empty_flags() {
        let hdr = RequestHeader::new(1, 2, 0);
        assert_eq!(hdr.flags, RequestFlags::empty());
    }

    #[test]
    fn test_response_header_roundtrip() {
        let hdr = ResponseHeader::new(0x1234_5678);
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        hdr.encode(&mut buf).unwrap();

        let decoded = ResponseHeader::decode(&buf).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.cookie, 0x1234_5678);
        assert_eq!(decoded.ret_code, 0);
        decoded.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_bad_magic() {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        RequestHeader::new(1, 1, 0).encode(&mut buf).unwrap();
        buf[0] ^= 0xFF;

        let decoded = RequestHeader::decode(&buf).unwrap();
        assert!(matches!(
            decoded.verify(),
            Err(Error::Protocol(ProtocolError::BadMagic { .. }))
        ));
    }

    #[test]
    fn test_verify_rejects_bad_version() {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        ResponseHeader::new(9).encode(&mut buf).unwrap();
        buf[4] = HEADER_VERSION + 1;

        let decoded = ResponseHeader::decode(&buf).unwrap();
        assert!(matches!(
            decoded.verify(),
            Err(Error::Protocol(ProtocolError::BadVersion { .. }))
        ));
    }

    #[test]
    fn test_short_buffer_is_a_size_error() {
        let buf = [0u8; 8];
        assert!(matches!(
            RequestHeader::decode(&buf),
            Err(Error::Size { expected: REQUEST_HEADER_SIZE, .. })
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            ResponseHeader::new(0).encode(&mut buf),
            Err(Error::Size { expected: RESPONSE_HEADER_SIZE, .. })
        ));
    }
}
