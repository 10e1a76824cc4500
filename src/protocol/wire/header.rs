use super::Encode;
use crate::Error;
use crate::protocol::HEADER_BYTES;
use bytes::{Buf, BufMut};
use std::convert::TryFrom;

uint_enum! {
    /// the type of the packet [2.2.3.1.1]
    #[repr(u8)]
    pub enum PacketType {
        SqlBatch = 1,
        /// sent by the server only
        TabularResult = 4,
        Login7 = 16,
        PreLogin = 18,
    }
}

uint_enum! {
    /// the message state [2.2.3.1.2]
    #[repr(u8)]
    pub enum PacketStatus {
        NormalMessage = 0,
        EndOfMessage = 1,
    }
}

/// packet header consisting of 8 bytes [2.2.3.1]
#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketHeader {
    ty: PacketType,
    status: PacketStatus,
    /// [BE] the length of the packet (including the 8 header bytes)
    length: u16,
    /// [BE] the process ID on the server, for debugging purposes only
    spid: u16,
    /// packet id
    id: u8,
    /// currently unused
    window: u8,
}

impl PacketHeader {
    /// Every message this client sends fits in one packet, so the status is
    /// always end-of-message and the packet id is always 1.
    pub(crate) fn new(ty: PacketType, length: u16) -> PacketHeader {
        PacketHeader {
            ty,
            status: PacketStatus::EndOfMessage,
            length,
            spid: 0,
            id: 1,
            window: 0,
        }
    }

    pub(crate) fn status(&self) -> PacketStatus {
        self.status
    }

    pub(crate) fn r#type(&self) -> PacketType {
        self.ty
    }

    pub(crate) fn length(&self) -> u16 {
        self.length
    }

    /// Decodes a header from its wire form, validating the type byte.
    pub(crate) fn decode<B: Buf>(src: &mut B) -> crate::Result<Self> {
        if src.remaining() < HEADER_BYTES {
            return Err(Error::Protocol("header: not enough bytes".into()));
        }

        let raw_ty = src.get_u8();

        let ty = PacketType::try_from(raw_ty).map_err(|_| {
            Error::Protocol(format!("header: invalid packet type: {}", raw_ty).into())
        })?;

        let status = PacketStatus::try_from(src.get_u8())
            .map_err(|_| Error::Protocol("header: invalid packet status".into()))?;

        Ok(PacketHeader {
            ty,
            status,
            length: src.get_u16(),
            spid: src.get_u16(),
            id: src.get_u8(),
            window: src.get_u8(),
        })
    }
}

impl<B> Encode<B> for PacketHeader
where
    B: BufMut,
{
    fn encode(self, dst: &mut B) -> crate::Result<()> {
        dst.put_u8(self.ty as u8);
        dst.put_u8(self.status as u8);
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.id);
        dst.put_u8(self.window);

        Ok(())
    }
}
