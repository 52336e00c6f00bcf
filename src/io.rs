//! Transport plumbing shared by both protocols.

use crate::{AsyncRead, AsyncWrite};
use bytes::Bytes;
use futures_util::io::AsyncReadExt;
use futures_util::ready;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Size of buffer reading from the transport.
const READ_BUF_INIT_SIZE: usize = 16_384;

/// A bidirectional transport, typically a TCP or TLS stream.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<S> Io for S where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type erased transport handed between connections, pipes and hijack handlers.
pub type BoxIo = Box<dyn Io>;

/// Our own buffered reader.
///
/// Reading the head of a request/response looks for `\r\n\r\n` and keeps
/// any bytes read past it for the body that follows. Writes pass straight
/// through.
#[derive(Debug)]
pub(crate) struct BufIo<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R> BufIo<R> {
    pub fn new(inner: R) -> Self {
        BufIo::with_buffered(inner, vec![])
    }

    pub fn with_buffered(inner: R, buf: Vec<u8>) -> Self {
        BufIo { inner, buf, pos: 0 }
    }

    /// Split into inner reader and any bytes not yet consumed.
    pub fn into_parts(mut self) -> (R, Vec<u8>) {
        let rest = self.buf.split_off(self.pos);
        (self.inner, rest)
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn consume(&mut self, amount: usize) {
        self.pos += amount;
        assert!(self.pos <= self.buf.len());
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }
}

impl<R> BufIo<R>
where
    R: AsyncRead + Unpin,
{
    /// Read more bytes from the transport into the buffer. 0 means EOF.
    async fn fill(&mut self) -> io::Result<usize> {
        let len = self.buf.len();
        self.buf.resize(len + READ_BUF_INIT_SIZE, 0);
        let res = self.inner.read(&mut self.buf[len..]).await;
        let amount = *res.as_ref().unwrap_or(&0);
        self.buf.truncate(len + amount);
        res
    }

    /// Read a complete http/1.x head, up to and including `\r\n\r\n`.
    ///
    /// `None` if the transport is closed before any byte arrives, which is the
    /// normal end of a persistent connection.
    pub async fn read_head(&mut self, max: usize) -> io::Result<Option<Vec<u8>>> {
        const END_OF_HEADER: &[u8] = b"\r\n\r\n";

        let mut searched = 0;

        loop {
            let buffered = self.buffered();

            if let Some(idx) = buffered[searched..]
                .windows(END_OF_HEADER.len())
                .position(|w| w == END_OF_HEADER)
            {
                let end = searched + idx + END_OF_HEADER.len();
                let head = buffered[..end].to_vec();
                self.consume(end);
                return Ok(Some(head));
            }

            if buffered.len() > max {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("http11 header larger than {} bytes", max),
                ));
            }

            // the end sequence can straddle two reads.
            searched = buffered.len().saturating_sub(END_OF_HEADER.len() - 1);

            if self.fill().await? == 0 {
                if self.buffered().is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF before complete http11 header",
                ));
            }
        }
    }

    /// Read up to `max` bytes as one chunk. Empty at EOF.
    ///
    /// Goes through the internal buffer, which is kept between reads.
    pub async fn read_chunk(&mut self, max: usize) -> io::Result<Bytes> {
        if self.buffered().is_empty() && self.fill().await? == 0 {
            return Ok(Bytes::new());
        }

        let amount = max.min(self.buffered().len());
        let chunk = Bytes::copy_from_slice(&self.buffered()[..amount]);
        self.consume(amount);

        Ok(chunk)
    }

    /// Read a single line terminated by `\r\n`, returned without the terminator.
    pub async fn read_line(&mut self, max: usize) -> io::Result<Vec<u8>> {
        loop {
            let buffered = self.buffered();

            if let Some(idx) = buffered.windows(2).position(|w| w == b"\r\n") {
                let line = buffered[..idx].to_vec();
                self.consume(idx + 2);
                return Ok(line);
            }

            if buffered.len() > max {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "Line too long"));
            }

            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF before end of line",
                ));
            }
        }
    }
}

impl<R> AsyncRead for BufIo<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // First ship out already buffered data.
        if !this.buffered().is_empty() {
            let max = buf.len().min(this.buffered().len());
            buf[..max].copy_from_slice(&this.buffered()[..max]);
            this.consume(max);
            return Ok(max).into();
        }

        let amount = ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        Ok(amount).into()
    }
}

impl<R> AsyncWrite for BufIo<R>
where
    R: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_close(cx)
    }
}

/// A reader and a writer joined into one bidirectional transport.
///
/// Used to hand back a split transport as a whole, keeping whatever the
/// reader has buffered.
#[derive(Debug)]
pub(crate) struct Duplex<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Duplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Duplex { reader, writer }
    }
}

impl<R, W> AsyncRead for Duplex<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for Duplex<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_close(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::Cursor;

    #[test]
    fn head_keeps_body_bytes() {
        async_std::task::block_on(async {
            let data = b"GET / HTTP/1.1\r\nhost: x\r\n\r\nbody".to_vec();
            let mut io = BufIo::new(Cursor::new(data));

            let head = io.read_head(1024).await.unwrap().unwrap();
            assert_eq!(head, b"GET / HTTP/1.1\r\nhost: x\r\n\r\n");

            let mut rest = vec![];
            io.read_to_end(&mut rest).await.unwrap();
            assert_eq!(rest, b"body");
        });
    }

    #[test]
    fn head_eof_before_any_byte() {
        async_std::task::block_on(async {
            let mut io = BufIo::new(Cursor::new(vec![]));
            assert!(io.read_head(1024).await.unwrap().is_none());
        });
    }

    #[test]
    fn head_partial_is_eof_error() {
        async_std::task::block_on(async {
            let mut io = BufIo::new(Cursor::new(b"GET / HTTP/1.1\r\n".to_vec()));
            let err = io.read_head(1024).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        });
    }

    #[test]
    fn chunks_reuse_the_buffer() {
        async_std::task::block_on(async {
            let data = b"HTTP/1.1 200 OK\r\n\r\nhello world".to_vec();
            let mut io = BufIo::new(Cursor::new(data));

            io.read_head(1024).await.unwrap().unwrap();
            let cap = io.buf.capacity();

            assert_eq!(&io.read_chunk(5).await.unwrap()[..], b"hello");
            assert_eq!(&io.read_chunk(100).await.unwrap()[..], b" world");
            assert!(io.read_chunk(100).await.unwrap().is_empty());

            assert_eq!(io.buf.capacity(), cap);
        });
    }
}
