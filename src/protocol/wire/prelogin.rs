use super::Encode;
use crate::EncryptionLevel;
use bytes::BufMut;

const OPTION_VERSION: u8 = 0x00;
const OPTION_ENCRYPTION: u8 = 0x01;
const OPTION_TERMINATOR: u8 = 0xFF;

/// The unauthenticated handshake message [2.2.6.5].
///
/// An option table of `(token, offset, length)` triples terminated by 0xFF,
/// followed by the payload bytes the triples point at. Offsets and lengths
/// are big-endian and relative to the start of the message. This client
/// announces a placeholder version and asks for login-only encryption.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreloginMessage {
    version: (u8, u8, u16, u16),
    encryption: EncryptionLevel,
}

impl PreloginMessage {
    pub(crate) fn new() -> Self {
        Self {
            // Placeholder major.minor.build.sub_build; the server does not
            // act on the client version during this handshake.
            version: (1, 0, 0, 0),
            encryption: EncryptionLevel::Off,
        }
    }
}

impl<B> Encode<B> for PreloginMessage
where
    B: BufMut,
{
    fn encode(self, dst: &mut B) -> crate::Result<()> {
        const VERSION_LEN: u16 = 6;
        const ENCRYPTION_LEN: u16 = 1;

        // Two five-byte table entries plus the terminator.
        let payload_start = 2 * 5 + 1;

        dst.put_u8(OPTION_VERSION);
        dst.put_u16(payload_start);
        dst.put_u16(VERSION_LEN);

        dst.put_u8(OPTION_ENCRYPTION);
        dst.put_u16(payload_start + VERSION_LEN);
        dst.put_u16(ENCRYPTION_LEN);

        dst.put_u8(OPTION_TERMINATOR);

        let (major, minor, build, sub_build) = self.version;
        dst.put_u8(major);
        dst.put_u8(minor);
        dst.put_u16(build);
        // Sub-build is the one little-endian field in an otherwise
        // big-endian message.
        dst.put_u16_le(sub_build);

        dst.put_u8(self.encryption as u8);

        Ok(())
    }
}
