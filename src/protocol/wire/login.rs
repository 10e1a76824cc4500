use super::Encode;
use crate::TextEncoding;
use bytes::BufMut;
use enumflags2::{BitFlags, bitflags};
use std::borrow::Cow;

/// Length of the fixed Login7 header: nine 32-bit fields, nine offset/length
/// table entries, the 6-byte client id, three trailing table entries and the
/// 32-bit SSPI length.
const FIXED_LEN: usize = 94;

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub(crate) enum LoginFlag {
    /// fByteOrder: integers are big-endian on the client.
    BigEndian = 0x01,
    /// fChar: the client character set is EBCDIC.
    CharsetEbcdic = 0x02,
    /// fUseDB: warn on implicit USE switches.
    UseDbNotify = 0x20,
    /// fInitDBFatal: failing to open the initial database kills the login.
    InitDbFatal = 0x40,
    /// fLanguageFatal: failing to set the initial language kills the login.
    LangChangeFatal = 0x80,
    /// fIntSecurity: integrated (SSPI) authentication.
    IntegratedSecurity = 0x80_00,
    /// fChangePassword: the login carries a new password.
    ChangePassword = 0x01_00_00_00,
    /// fUserInstance: request a user instance.
    UserInstance = 0x04_00_00_00,
}

/// The authenticated handshake message [2.2.6.4].
///
/// A fixed header, an offset/length table pointing into a trailing block of
/// UCS-2 strings, and a nibble-swapped, XOR-obfuscated password. All
/// integers are little-endian, offsets count bytes, lengths count
/// characters.
#[derive(Debug, Clone)]
pub(crate) struct LoginMessage<'a> {
    tds_version: u32,
    packet_size: u32,
    client_prog_ver: u32,
    client_pid: u32,
    connection_id: u32,
    flags: BitFlags<LoginFlag>,
    client_time_zone: i32,
    client_lcid: u32,
    hostname: Cow<'a, str>,
    username: Cow<'a, str>,
    password: Cow<'a, str>,
    app_name: Cow<'a, str>,
    server_name: Cow<'a, str>,
    library_name: Cow<'a, str>,
    db_name: Cow<'a, str>,
    client_id: [u8; 6],
    encoding: TextEncoding,
}

impl<'a> LoginMessage<'a> {
    pub(crate) fn new(encoding: TextEncoding) -> Self {
        Self {
            // TDS 7.4
            tds_version: 0x74_00_00_04,
            packet_size: 8000,
            client_prog_ver: 0x06_00_00_00,
            client_pid: 0,
            connection_id: 0,
            flags: BitFlags::empty(),
            client_time_zone: 0,
            client_lcid: 0,
            hostname: "".into(),
            username: "".into(),
            password: "".into(),
            app_name: "".into(),
            server_name: ".".into(),
            library_name: "".into(),
            db_name: "".into(),
            client_id: [0; 6],
            encoding,
        }
    }

    pub(crate) fn hostname(&mut self, hostname: impl Into<Cow<'a, str>>) {
        self.hostname = hostname.into();
    }

    pub(crate) fn credentials(
        &mut self,
        username: impl Into<Cow<'a, str>>,
        password: impl Into<Cow<'a, str>>,
    ) {
        self.username = username.into();
        self.password = password.into();
    }

    pub(crate) fn app_name(&mut self, app_name: impl Into<Cow<'a, str>>) {
        let app_name = app_name.into();
        // The client library name rides along with the application name,
        // the same way the original driver reports itself.
        self.library_name = app_name.clone();
        self.app_name = app_name;
    }

    pub(crate) fn db_name(&mut self, db_name: impl Into<Cow<'a, str>>) {
        self.db_name = db_name.into();
    }
}

impl<'a, B> Encode<B> for LoginMessage<'a>
where
    B: BufMut,
{
    fn encode(self, dst: &mut B) -> crate::Result<()> {
        let mut password = Vec::with_capacity(self.encoding.byte_len(&self.password));
        self.encoding.append_to(&self.password, &mut password);
        obfuscate_password(&mut password);

        let total_len = FIXED_LEN
            + self.encoding.byte_len(&self.hostname)
            + self.encoding.byte_len(&self.username)
            + password.len()
            + self.encoding.byte_len(&self.app_name)
            + self.encoding.byte_len(&self.server_name)
            + self.encoding.byte_len(&self.library_name)
            + self.encoding.byte_len(&self.db_name);

        dst.put_u32_le(total_len as u32);
        dst.put_u32_le(self.tds_version);
        dst.put_u32_le(self.packet_size);
        dst.put_u32_le(self.client_prog_ver);
        dst.put_u32_le(self.client_pid);
        dst.put_u32_le(self.connection_id);
        dst.put_u32_le(self.flags.bits());
        dst.put_i32_le(self.client_time_zone);
        dst.put_u32_le(self.client_lcid);

        // The offset table. Offsets are byte positions, lengths are
        // character counts; the obfuscated password is two bytes per
        // character like every other string.
        let mut offset = FIXED_LEN;

        let mut entry = |dst: &mut B, char_len: usize, byte_len: usize| {
            dst.put_u16_le(offset as u16);
            dst.put_u16_le(char_len as u16);
            offset += byte_len;
        };

        for s in [&self.hostname, &self.username] {
            entry(dst, self.encoding.char_len(s), self.encoding.byte_len(s));
        }

        entry(dst, password.len() / 2, password.len());

        for s in [&self.app_name, &self.server_name] {
            entry(dst, self.encoding.char_len(s), self.encoding.byte_len(s));
        }

        // Unused extension block.
        entry(dst, 0, 0);

        entry(
            dst,
            self.encoding.char_len(&self.library_name),
            self.encoding.byte_len(&self.library_name),
        );

        // Unused language block.
        entry(dst, 0, 0);

        entry(
            dst,
            self.encoding.char_len(&self.db_name),
            self.encoding.byte_len(&self.db_name),
        );

        dst.put_slice(&self.client_id);

        // Unused SSPI, attach-db-file and change-password blocks.
        for _ in 0..3 {
            entry(dst, 0, 0);
        }

        // SSPI long length.
        dst.put_u32_le(0);

        for s in [
            &self.hostname,
            &self.username,
        ] {
            self.encoding.append_to(s, dst);
        }

        dst.put_slice(&password);

        for s in [
            &self.app_name,
            &self.server_name,
            &self.library_name,
            &self.db_name,
        ] {
            self.encoding.append_to(s, dst);
        }

        Ok(())
    }
}

/// The protocol-mandated password transform: swap the nibbles of every byte,
/// then XOR with 0xA5. Obfuscation, not protection.
pub(crate) fn obfuscate_password(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        *byte = (*byte << 4 | *byte >> 4) ^ 0xA5;
    }
}
