mod buffer;
pub(crate) mod parser;
pub(crate) mod wire;

pub(crate) use buffer::*;

/// The amount of bytes a packet header consists of
pub const HEADER_BYTES: usize = 8;

/// The declared length of a packet must stay strictly below this. A larger
/// length either means an out-of-contract server or a message that would
/// need multi-packet reassembly, which this client does not perform.
pub const MAX_PACKET_SIZE: usize = 8192;

uint_enum! {
    /// The configured encryption level specifying if encryption is required.
    #[repr(u8)]
    pub enum EncryptionLevel {
        /// Only use encryption for the login procedure
        Off = 0,
        /// Encrypt everything if possible
        On = 1,
        /// Do not encrypt anything
        NotSupported = 2,
        /// Encrypt everything and fail if not possible
        Required = 3,
    }
}

/// The text encoding the server expects on the wire.
///
/// TDS mandates two bytes per character for all strings this client sends;
/// the encoding is still passed explicitly into the framing engine instead
/// of being baked into every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UCS-2 (UTF-16LE as far as this client is concerned).
    Ucs2,
}

impl TextEncoding {
    /// Appends the encoded form of `s` to `dst`, returning the number of
    /// bytes written.
    pub(crate) fn append_to<B: bytes::BufMut>(self, s: &str, dst: &mut B) -> usize {
        match self {
            TextEncoding::Ucs2 => {
                let mut written = 0;
                for unit in s.encode_utf16() {
                    dst.put_slice(&unit.to_le_bytes());
                    written += 2;
                }
                written
            }
        }
    }

    /// The number of bytes `s` occupies once encoded.
    pub(crate) fn byte_len(self, s: &str) -> usize {
        match self {
            TextEncoding::Ucs2 => s.encode_utf16().count() * 2,
        }
    }

    /// The number of encoded characters in `s`. Offset tables in Login7
    /// count characters, not bytes.
    pub(crate) fn char_len(self, s: &str) -> usize {
        match self {
            TextEncoding::Ucs2 => s.encode_utf16().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ucs2_encodes_two_bytes_per_char() {
        let mut buf = Vec::new();
        let written = TextEncoding::Ucs2.append_to("AB", &mut buf);
        assert_eq!(4, written);
        assert_eq!(vec![0x41, 0x00, 0x42, 0x00], buf);
    }

    #[test]
    fn ucs2_lengths() {
        assert_eq!(10, TextEncoding::Ucs2.byte_len("hello"));
        assert_eq!(5, TextEncoding::Ucs2.char_len("hello"));
        assert_eq!(0, TextEncoding::Ucs2.byte_len(""));
    }

    #[test]
    fn encryption_level_from_u8() {
        use std::convert::TryFrom;
        assert_eq!(Ok(EncryptionLevel::Off), EncryptionLevel::try_from(0u8));
        assert_eq!(
            Ok(EncryptionLevel::Required),
            EncryptionLevel::try_from(3u8)
        );
        assert!(EncryptionLevel::try_from(9u8).is_err());
    }
}
