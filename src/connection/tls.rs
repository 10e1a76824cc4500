//! TLS tunneled inside packet framing.
//!
//! The server requires every byte of the TLS handshake to travel inside
//! PreLogin-typed packets; only after the handshake do raw TLS records flow
//! on the wire. [`TlsPreloginWrapper`] sits between the TLS engine and the
//! transport and performs that wrapping until it is switched into
//! passthrough, exactly once, after the handshake succeeds.

use crate::protocol::wire::{PacketStatus, PacketType};
use crate::protocol::{HEADER_BYTES, MAX_PACKET_SIZE};
use byteorder::{BigEndian, ByteOrder};
use futures_util::io::{AsyncRead, AsyncWrite};
use futures_util::ready;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{Level, event};

use super::tls_stream::TlsStream;

/// The transport a connection runs on: the raw stream during PreLogin, the
/// encrypted stream from Login7 onwards. The switch happens exactly once.
#[derive(Debug)]
pub(crate) enum MaybeTlsStream<S: AsyncRead + AsyncWrite + Unpin + Send> {
    Raw(S),
    Tls(TlsStream<TlsPreloginWrapper<S>>),
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match Pin::get_mut(self) {
            Self::Raw(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match Pin::get_mut(self) {
            Self::Raw(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::get_mut(self) {
            Self::Raw(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::get_mut(self) {
            Self::Raw(s) => Pin::new(s).poll_close(cx),
            Self::Tls(s) => Pin::new(s).poll_close(cx),
        }
    }
}

/// A transport decorator that frames handshake bytes in packet headers.
///
/// While the handshake is pending, written bytes are collected and sent as
/// one PreLogin packet per flush, and reads strip inbound packet headers,
/// handing the TLS engine at most the remainder of the current packet.
/// After [`handshake_complete`](Self::handshake_complete) both directions
/// pass through untouched.
#[derive(Debug)]
pub(crate) struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,

    header_buf: [u8; HEADER_BYTES],
    header_pos: usize,
    read_remaining: usize,

    wr_buf: Vec<u8>,
    header_written: bool,
}

impl<S> TlsPreloginWrapper<S> {
    pub(crate) fn new(stream: S) -> Self {
        TlsPreloginWrapper {
            stream,
            pending_handshake: true,

            header_buf: [0u8; HEADER_BYTES],
            header_pos: 0,
            read_remaining: 0,

            wr_buf: vec![0u8; HEADER_BYTES],
            header_written: false,
        }
    }

    /// Switches to passthrough. Called by the connection once the TLS
    /// handshake has succeeded; there is no way back.
    pub(crate) fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }
}

impl<S: AsyncRead + Unpin + Send> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let inner = Pin::get_mut(self);

        if !inner.pending_handshake {
            return Pin::new(&mut inner.stream).poll_read(cx, buf);
        }

        loop {
            if inner.read_remaining == 0 {
                while inner.header_pos < HEADER_BYTES {
                    let read = ready!(Pin::new(&mut inner.stream)
                        .poll_read(cx, &mut inner.header_buf[inner.header_pos..]))?;

                    if read == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream closed inside the packet header",
                        )));
                    }

                    inner.header_pos += read;
                }

                let length = BigEndian::read_u16(&inner.header_buf[2..4]) as usize;

                if length < HEADER_BYTES || length >= MAX_PACKET_SIZE {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid handshake packet length: {}", length),
                    )));
                }

                event!(
                    Level::TRACE,
                    "Unwrapping a handshake packet ({} bytes)",
                    length,
                );

                inner.header_pos = 0;
                inner.read_remaining = length - HEADER_BYTES;

                // An empty packet carries nothing for the TLS engine; read
                // the next header instead of reporting a zero-byte read.
                if inner.read_remaining == 0 {
                    continue;
                }
            }

            let max = buf.len().min(inner.read_remaining);
            let read = ready!(Pin::new(&mut inner.stream).poll_read(cx, &mut buf[..max]))?;

            if read == 0 && max > 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed inside a handshake packet",
                )));
            }

            inner.read_remaining -= read;
            return Poll::Ready(Ok(read));
        }
    }
}

impl<S: AsyncWrite + Unpin + Send> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let inner = Pin::get_mut(self);

        if !inner.pending_handshake {
            return Pin::new(&mut inner.stream).poll_write(cx, buf);
        }

        inner.wr_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let inner = Pin::get_mut(self);

        // The handshake buffer is framed and written as one packet per
        // flush; the TLS engine flushes once per handshake flight. A frame
        // whose header is already written is mid-drain after a partial
        // write and must be re-entered regardless of how much is left.
        if inner.pending_handshake && (inner.header_written || inner.wr_buf.len() > HEADER_BYTES) {
            if !inner.header_written {
                let length = inner.wr_buf.len();

                if length >= MAX_PACKET_SIZE {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "handshake flight does not fit in a single packet",
                    )));
                }

                event!(
                    Level::TRACE,
                    "Wrapping a handshake flight ({} bytes)",
                    length,
                );

                inner.wr_buf[0] = PacketType::PreLogin as u8;
                inner.wr_buf[1] = PacketStatus::EndOfMessage as u8;
                BigEndian::write_u16(&mut inner.wr_buf[2..4], length as u16);
                inner.wr_buf[4] = 0;
                inner.wr_buf[5] = 0;
                inner.wr_buf[6] = 1;
                inner.wr_buf[7] = 0;

                inner.header_written = true;
            }

            while !inner.wr_buf.is_empty() {
                let written =
                    ready!(Pin::new(&mut inner.stream).poll_write(cx, &inner.wr_buf))?;

                if written == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream closed while writing a handshake packet",
                    )));
                }

                inner.wr_buf.drain(..written);
            }

            inner.wr_buf.resize(HEADER_BYTES, 0);
            inner.header_written = false;
        }

        Pin::new(&mut inner.stream).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut Pin::get_mut(self).stream).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::io::{AsyncReadExt, AsyncWriteExt, Cursor};

    /// Joins a scripted inbound buffer with a captured outbound buffer.
    struct Pipe {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl Pipe {
        fn new(inbound: Vec<u8>) -> Self {
            Self {
                inbound: Cursor::new(inbound),
                outbound: Vec::new(),
            }
        }
    }

    impl AsyncRead for Pipe {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inbound).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for Pipe {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.outbound.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x12, 0x01];
        bytes.extend_from_slice(&((payload.len() + 8) as u16).to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn writes_are_framed_per_flush() {
        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(Vec::new()));

        wrapper.write_all(b"client").await.unwrap();
        wrapper.write_all(b" hello").await.unwrap();
        wrapper.flush().await.unwrap();

        assert_eq!(frame(b"client hello"), wrapper.stream.outbound);

        wrapper.write_all(b"finished").await.unwrap();
        wrapper.flush().await.unwrap();

        let mut expected = frame(b"client hello");
        expected.extend_from_slice(&frame(b"finished"));
        assert_eq!(expected, wrapper.stream.outbound);
    }

    /// Accepts at most `quota` bytes, then returns `Pending` exactly once
    /// before accepting the rest.
    struct Stalling {
        outbound: Vec<u8>,
        quota: usize,
        stalled: bool,
    }

    impl Stalling {
        fn new(quota: usize) -> Self {
            Self {
                outbound: Vec::new(),
                quota,
                stalled: false,
            }
        }
    }

    impl AsyncRead for Stalling {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }
    }

    impl AsyncWrite for Stalling {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if !self.stalled && self.outbound.len() >= self.quota {
                self.stalled = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }

            let n = if self.stalled {
                buf.len()
            } else {
                buf.len().min(self.quota - self.outbound.len())
            };

            self.outbound.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn partial_write_resumes_the_same_frame() {
        // The transport takes 104 of the 108 framed bytes and then stalls;
        // the flush must pick the drain back up and deliver the tail
        // instead of reporting success with a truncated packet.
        let payload = vec![0xC3u8; 100];
        let mut wrapper = TlsPreloginWrapper::new(Stalling::new(104));

        wrapper.write_all(&payload).await.unwrap();
        wrapper.flush().await.unwrap();

        assert_eq!(frame(&payload), wrapper.stream.outbound);

        // The next flight starts on a clean buffer.
        wrapper.write_all(b"finished").await.unwrap();
        wrapper.flush().await.unwrap();

        let mut expected = frame(&payload);
        expected.extend_from_slice(&frame(b"finished"));
        assert_eq!(expected, wrapper.stream.outbound);
    }

    #[tokio::test]
    async fn empty_flush_writes_nothing() {
        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(Vec::new()));
        wrapper.flush().await.unwrap();
        assert!(wrapper.stream.outbound.is_empty());
    }

    #[tokio::test]
    async fn reads_strip_packet_headers() {
        let mut wire = frame(b"server hello");
        wire.extend_from_slice(&frame(b"done"));

        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(wire));

        let mut buf = vec![0u8; 16];
        let mut collected = Vec::new();
        while collected.len() < 16 {
            let n = wrapper.read(&mut buf).await.unwrap();
            collected.extend_from_slice(&buf[..n]);
        }

        assert_eq!(b"server hellodone", collected.as_slice());
    }

    #[tokio::test]
    async fn short_reads_stay_within_packet() {
        let wire = frame(b"abcdef");
        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(wire));

        let mut buf = [0u8; 4];
        let n = wrapper.read(&mut buf).await.unwrap();
        assert_eq!(4, n);
        assert_eq!(b"abcd", &buf[..4]);

        let n = wrapper.read(&mut buf).await.unwrap();
        assert_eq!(2, n);
        assert_eq!(b"ef", &buf[..2]);
    }

    #[tokio::test]
    async fn early_close_inside_header_is_fatal() {
        // Two header bytes, then end of stream.
        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(vec![0x12, 0x01]));

        let mut buf = [0u8; 8];
        let err = wrapper.read(&mut buf).await.unwrap_err();
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    }

    #[tokio::test]
    async fn early_close_inside_payload_is_fatal() {
        let mut wire = frame(b"abcdef");
        wire.truncate(10);

        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(wire));

        let mut buf = [0u8; 6];
        let mut seen = wrapper.read(&mut buf).await.unwrap();
        assert!(seen > 0);

        let err = loop {
            match wrapper.read(&mut buf).await {
                Ok(n) => seen += n,
                Err(e) => break e,
            }
        };
        assert!(seen < 6);
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    }

    #[tokio::test]
    async fn oversized_header_length_is_fatal() {
        let mut wire = vec![0x12, 0x01];
        wire.extend_from_slice(&8192u16.to_be_bytes());
        wire.extend_from_slice(&[0, 0, 1, 0]);

        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(wire));

        let mut buf = [0u8; 8];
        let err = wrapper.read(&mut buf).await.unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
    }

    #[tokio::test]
    async fn passthrough_after_handshake_complete() {
        let mut wrapper = TlsPreloginWrapper::new(Pipe::new(b"raw inbound".to_vec()));
        wrapper.handshake_complete();

        wrapper.write_all(b"raw outbound").await.unwrap();
        wrapper.flush().await.unwrap();
        assert_eq!(b"raw outbound", wrapper.stream.outbound.as_slice());

        let mut buf = [0u8; 11];
        wrapper.read_exact(&mut buf).await.unwrap();
        assert_eq!(b"raw inbound", &buf);
    }
}
