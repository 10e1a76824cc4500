//! Fixed-capacity buffered I/O cursors.
//!
//! One [`WriteBuffer`] and one [`ReadBuffer`] are owned by each framing
//! engine. Both hold a single packet-sized region; neither grows. The write
//! cursor exposes its position for backpatching a header written before the
//! payload length is known, the read cursor guarantees N contiguous unread
//! bytes before the caller looks at them.

use crate::{Error, TextEncoding};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use futures_util::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_PACKET_SIZE;

/// Outgoing byte cursor over a fixed packet-sized buffer.
///
/// Writes advance a position; `flush` hands exactly `position` bytes to the
/// transport and resets the cursor to zero. Every write is bounds-checked:
/// overflowing the buffer means the message cannot fit in a single packet,
/// which this client treats as a protocol error rather than splitting.
pub(crate) struct WriteBuffer {
    buf: Box<[u8]>,
    pos: usize,
}

impl std::fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("pos", &self.pos)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl WriteBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            pos: 0,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Moves the cursor. Used to reserve room for a header and to backpatch
    /// it once the payload length is known.
    pub(crate) fn set_position(&mut self, pos: usize) -> crate::Result<()> {
        if pos > self.buf.len() {
            return Err(Error::Misuse(
                "write cursor moved past the end of the buffer".into(),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    fn reserve(&mut self, len: usize) -> crate::Result<&mut [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(Error::Protocol(
                "message does not fit in a single packet".into(),
            ));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..start + len])
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> crate::Result<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub(crate) fn write_u16_be(&mut self, value: u16) -> crate::Result<()> {
        BigEndian::write_u16(self.reserve(2)?, value);
        Ok(())
    }

    pub(crate) fn write_u16_le(&mut self, value: u16) -> crate::Result<()> {
        LittleEndian::write_u16(self.reserve(2)?, value);
        Ok(())
    }

    pub(crate) fn write_u32_le(&mut self, value: u32) -> crate::Result<()> {
        LittleEndian::write_u32(self.reserve(4)?, value);
        Ok(())
    }

    pub(crate) fn write_u64_le(&mut self, value: u64) -> crate::Result<()> {
        LittleEndian::write_u64(self.reserve(8)?, value);
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Encodes `s` at the cursor, returning the number of bytes written.
    pub(crate) fn write_str(&mut self, s: &str, encoding: TextEncoding) -> crate::Result<usize> {
        let len = encoding.byte_len(s);
        let dst = self.reserve(len)?;

        match encoding {
            TextEncoding::Ucs2 => {
                for (i, unit) in s.encode_utf16().enumerate() {
                    dst[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
                }
            }
        }

        Ok(len)
    }

    /// Writes exactly `position` bytes to the transport, awaits completion
    /// and resets the cursor.
    pub(crate) async fn flush<W>(&mut self, transport: &mut W) -> crate::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if self.pos == 0 {
            return Ok(());
        }

        transport.write_all(&self.buf[..self.pos]).await?;
        transport.flush().await?;
        self.pos = 0;

        Ok(())
    }
}

/// Incoming byte cursor over a fixed packet-sized buffer.
///
/// Holds one contiguous unread region between the consumed offset and the
/// fill level. `try_ensure` answers "are N bytes already here" without I/O;
/// `ensure` suspends on the transport until they are. Exactly one `ensure`
/// can be in flight because it takes `&mut self`.
pub(crate) struct ReadBuffer {
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl std::fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("pos", &self.pos)
            .field("filled", &self.filled)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl ReadBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
        }
    }

    /// The currently buffered unread bytes, without any I/O.
    pub(crate) fn unread(&self) -> &[u8] {
        &self.buf[self.pos..self.filled]
    }

    /// Returns the unread region if it already holds at least `n` bytes.
    pub(crate) fn try_ensure(&self, n: usize) -> Option<&[u8]> {
        let unread = self.unread();
        (unread.len() >= n).then_some(unread)
    }

    /// Reads from the transport until at least `n` unread bytes are
    /// buffered, compacting the buffer when the tail has no room left. An
    /// end of stream before `n` bytes arrive is fatal.
    pub(crate) async fn ensure<R>(&mut self, transport: &mut R, n: usize) -> crate::Result<&[u8]>
    where
        R: AsyncRead + Unpin,
    {
        if n > self.buf.len() {
            return Err(Error::Protocol(
                "requested more bytes than the packet buffer holds".into(),
            ));
        }

        if self.pos + n > self.buf.len() {
            self.compact();
        }

        while self.filled - self.pos < n {
            let read = transport.read(&mut self.buf[self.filled..]).await?;

            if read == 0 {
                return Err(Error::Protocol(
                    "unexpected end of stream while reading a packet".into(),
                ));
            }

            self.filled += read;
        }

        Ok(&self.buf[self.pos..self.filled])
    }

    /// Advances the consumed offset past `n` bytes and returns them.
    pub(crate) fn consume(&mut self, n: usize) -> crate::Result<&[u8]> {
        if self.filled - self.pos < n {
            return Err(Error::Misuse(
                "consumed bytes that were never buffered".into(),
            ));
        }

        let start = self.pos;
        self.pos += n;

        // A drained buffer restarts at the front so the next packet never
        // needs compaction.
        if self.pos == self.filled {
            self.pos = 0;
            self.filled = 0;
        }

        Ok(&self.buf[start..start + n])
    }

    fn compact(&mut self) {
        self.buf.copy_within(self.pos..self.filled, 0);
        self.filled -= self.pos;
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Delivers an inner reader's bytes at most `chunk` bytes at a time.
    struct Chunked<R> {
        inner: R,
        chunk: usize,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for Chunked<R> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            let max = self.chunk.min(buf.len());
            Pin::new(&mut self.inner).poll_read(cx, &mut buf[..max])
        }
    }

    #[test]
    fn write_buffer_endianness() {
        let mut buf = WriteBuffer::new();
        buf.write_u16_be(0x0102).unwrap();
        buf.write_u16_le(0x0304).unwrap();
        buf.write_u32_le(0x05060708).unwrap();
        buf.write_u64_le(1).unwrap();
        buf.write_u8(0xFF).unwrap();

        assert_eq!(17, buf.position());
        assert_eq!(
            &[0x01, 0x02, 0x04, 0x03, 0x08, 0x07, 0x06, 0x05],
            &buf.buf[..8]
        );
        assert_eq!(&[1, 0, 0, 0, 0, 0, 0, 0, 0xFF], &buf.buf[8..17]);
    }

    #[test]
    fn write_buffer_backpatch() {
        let mut buf = WriteBuffer::new();
        buf.set_position(8).unwrap();
        buf.write_bytes(b"payload").unwrap();
        let end = buf.position();

        buf.set_position(0).unwrap();
        buf.write_u16_be(end as u16).unwrap();
        buf.set_position(end).unwrap();

        assert_eq!(15, buf.position());
        assert_eq!(&[0x00, 0x0F], &buf.buf[..2]);
        assert_eq!(b"payload", &buf.buf[8..15]);
    }

    #[test]
    fn write_buffer_overflow_is_protocol_error() {
        let mut buf = WriteBuffer::new();
        let big = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            buf.write_bytes(&big),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn write_buffer_set_position_bounds() {
        let mut buf = WriteBuffer::new();
        assert!(buf.set_position(MAX_PACKET_SIZE).is_ok());
        assert!(matches!(
            buf.set_position(MAX_PACKET_SIZE + 1),
            Err(Error::Misuse(_))
        ));
    }

    #[test]
    fn write_str_is_utf16le() {
        let mut buf = WriteBuffer::new();
        let written = buf.write_str("A1", TextEncoding::Ucs2).unwrap();
        assert_eq!(4, written);
        assert_eq!(&[0x41, 0x00, 0x31, 0x00], &buf.buf[..4]);
    }

    #[tokio::test]
    async fn flush_writes_everything_and_resets() {
        let mut buf = WriteBuffer::new();
        buf.write_bytes(b"hello").unwrap();

        let mut out = Cursor::new(Vec::new());
        buf.flush(&mut out).await.unwrap();

        assert_eq!(b"hello", out.get_ref().as_slice());
        assert_eq!(0, buf.position());

        // Flushing an empty buffer writes nothing.
        buf.flush(&mut out).await.unwrap();
        assert_eq!(5, out.get_ref().len());
    }

    #[tokio::test]
    async fn ensure_loops_over_small_reads() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut transport = Chunked {
            inner: Cursor::new(data.clone()),
            chunk: 1,
        };

        let mut buf = ReadBuffer::new();
        let unread = buf.ensure(&mut transport, 100).await.unwrap();
        assert_eq!(data.as_slice(), unread);
    }

    #[tokio::test]
    async fn ensure_fails_on_end_of_stream() {
        let mut transport = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = ReadBuffer::new();

        let err = buf.ensure(&mut transport, 4).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn try_ensure_never_performs_io() {
        let mut transport = Cursor::new(vec![0u8; 16]);
        let mut buf = ReadBuffer::new();

        assert!(buf.try_ensure(1).is_none());

        buf.ensure(&mut transport, 8).await.unwrap();
        assert!(buf.try_ensure(8).is_some());
        assert!(buf.try_ensure(17).is_none());
    }

    #[tokio::test]
    async fn consume_advances_and_resets_when_drained() {
        let mut transport = Cursor::new((0..10u8).collect::<Vec<_>>());
        let mut buf = ReadBuffer::new();

        buf.ensure(&mut transport, 10).await.unwrap();

        assert_eq!(&[0, 1, 2, 3], buf.consume(4).unwrap());
        assert_eq!(&[4, 5, 6, 7, 8, 9], buf.consume(6).unwrap());
        assert_eq!(0, buf.pos);
        assert_eq!(0, buf.filled);

        assert!(matches!(buf.consume(1), Err(Error::Misuse(_))));
    }

    #[tokio::test]
    async fn ensure_compacts_when_tail_is_full() {
        // Fill the buffer completely, consume most of it, then require more
        // than the remaining tail space so compaction has to kick in.
        let mut first = Cursor::new(vec![0xAAu8; MAX_PACKET_SIZE]);
        let mut buf = ReadBuffer::new();
        buf.ensure(&mut first, MAX_PACKET_SIZE).await.unwrap();
        buf.consume(MAX_PACKET_SIZE - 4).unwrap();

        let mut second = Cursor::new(vec![0xBBu8; 12]);
        let unread = buf.ensure(&mut second, 16).await.unwrap();

        assert_eq!(&[0xAA; 4][..], &unread[..4]);
        assert_eq!(&[0xBB; 12][..], &unread[4..16]);
    }
}
