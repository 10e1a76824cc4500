//! The packet framing engine.
//!
//! Owns the transport plus one write and one read cursor. Outgoing messages
//! are assembled into a scratch buffer and framed by [`PacketParser::write_packet`];
//! the inbound side is a two-phase `ensure_single_packet` / `read_packet`
//! pair so a fully buffered packet never suspends.

use crate::protocol::wire::{
    ALL_HEADERS_LEN_TX, AllHeaderTy, Encode, LoginMessage, PacketHeader, PacketType,
    PreloginMessage,
};
use crate::protocol::{HEADER_BYTES, MAX_PACKET_SIZE, ReadBuffer, TextEncoding, WriteBuffer};
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use futures_util::io::{AsyncRead, AsyncWrite};
use tracing::{Level, event};

/// Reads the header-inclusive length out of the first four header bytes and
/// enforces the single-packet bound.
fn decode_packet_length(header: &[u8]) -> crate::Result<usize> {
    let length = BigEndian::read_u16(&header[2..4]) as usize;

    if length < HEADER_BYTES || length >= MAX_PACKET_SIZE {
        return Err(Error::Protocol(
            format!("invalid packet length: {}", length).into(),
        ));
    }

    Ok(length)
}

#[derive(Debug)]
pub(crate) struct PacketParser<S> {
    transport: S,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    scratch: BytesMut,
    encoding: TextEncoding,
    /// Declared (header-inclusive) length of the pending inbound packet.
    packet_length: Option<usize>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> PacketParser<S> {
    pub(crate) fn new(transport: S, encoding: TextEncoding) -> Self {
        Self {
            transport,
            read_buf: ReadBuffer::new(),
            write_buf: WriteBuffer::new(),
            scratch: BytesMut::new(),
            encoding,
            packet_length: None,
        }
    }

    pub(crate) fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Gives the transport back so the caller can rebind it, typically to
    /// wrap it in TLS after the PreLogin exchange.
    pub(crate) fn into_inner(self) -> S {
        self.transport
    }

    pub(crate) fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub(crate) async fn send_prelogin(&mut self) -> crate::Result<()> {
        self.scratch.clear();
        PreloginMessage::new().encode(&mut self.scratch)?;

        let payload = self.scratch.split();
        self.write_packet(&payload, PacketType::PreLogin)?;
        self.write_buf.flush(&mut self.transport).await
    }

    pub(crate) async fn send_login(&mut self, login: LoginMessage<'_>) -> crate::Result<()> {
        self.scratch.clear();
        login.encode(&mut self.scratch)?;

        let payload = self.scratch.split();
        self.write_packet(&payload, PacketType::Login7)?;
        self.write_buf.flush(&mut self.transport).await
    }

    /// Sends one SQL batch: the ALL_HEADERS transaction prologue followed by
    /// the encoded text. Written through the cursor's backpatch path so the
    /// header length lands after the text size is known.
    pub(crate) async fn send_batch(&mut self, sql: &str) -> crate::Result<()> {
        if self.write_buf.position() != 0 {
            return Err(Error::Misuse(
                "batch started while the write cursor holds unflushed bytes".into(),
            ));
        }

        self.write_buf.set_position(HEADER_BYTES)?;

        self.write_buf.write_u32_le(ALL_HEADERS_LEN_TX as u32)?;
        self.write_buf.write_u32_le((ALL_HEADERS_LEN_TX - 4) as u32)?;
        self.write_buf
            .write_u16_le(AllHeaderTy::TransactionDescriptor as u16)?;
        // Transaction descriptor: no open transaction.
        self.write_buf.write_u64_le(0)?;
        // Outstanding request count.
        self.write_buf.write_u32_le(1)?;

        self.write_buf.write_str(sql, self.encoding)?;

        let length = self.write_buf.position();
        if length >= MAX_PACKET_SIZE {
            return Err(Error::Protocol(
                "batch does not fit in a single packet".into(),
            ));
        }

        self.write_buf.set_position(0)?;
        self.write_header(PacketType::SqlBatch, length)?;
        self.write_buf.set_position(length)?;

        event!(Level::TRACE, "Sending a batch ({} bytes)", length);

        self.write_buf.flush(&mut self.transport).await
    }

    /// Frames `payload` as exactly one packet in the write cursor. The
    /// caller flushes.
    fn write_packet(&mut self, payload: &[u8], ty: PacketType) -> crate::Result<()> {
        let length = payload.len() + HEADER_BYTES;
        if length >= MAX_PACKET_SIZE {
            return Err(Error::Protocol(
                "message does not fit in a single packet".into(),
            ));
        }

        event!(Level::TRACE, "Sending a {:?} ({} bytes)", ty, length);

        self.write_header(ty, length)?;
        self.write_buf.write_bytes(payload)
    }

    fn write_header(&mut self, ty: PacketType, length: usize) -> crate::Result<()> {
        let mut header = [0u8; HEADER_BYTES];
        let mut dst = &mut header[..];
        PacketHeader::new(ty, length as u16).encode(&mut dst)?;
        self.write_buf.write_bytes(&header)
    }

    /// Suspends until one full packet is buffered. Returns without any I/O
    /// when the packet already sits in the read cursor.
    pub(crate) async fn ensure_single_packet(&mut self) -> crate::Result<()> {
        if self.packet_length.is_some() {
            return Err(Error::Misuse(
                "a packet is already pending; read it first".into(),
            ));
        }

        if let Some(buffered) = self.read_buf.try_ensure(4) {
            let length = decode_packet_length(buffered)?;

            if buffered.len() >= length {
                self.packet_length = Some(length);
                return Ok(());
            }
        }

        let (length, buffered) = {
            let header = self.read_buf.ensure(&mut self.transport, 4).await?;
            (decode_packet_length(header)?, header.len())
        };

        if buffered < length {
            self.read_buf.ensure(&mut self.transport, length).await?;
        }

        event!(Level::TRACE, "Received a packet ({} bytes)", length);

        self.packet_length = Some(length);
        Ok(())
    }

    /// Returns the payload of the pending packet, header stripped, and
    /// forgets the pending length.
    pub(crate) fn read_packet(&mut self) -> crate::Result<&[u8]> {
        let length = self.packet_length.take().ok_or(Error::Misuse(
            "no packet is pending; call ensure_single_packet first".into(),
        ))?;

        let packet = self.read_buf.consume(length)?;
        Ok(&packet[HEADER_BYTES..])
    }
}
