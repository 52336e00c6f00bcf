use super::{Body, Writable, DEFAULT_BOUND};
use crate::io::{BoxIo, Duplex};
use crate::AsyncRead;
use crate::Error;
use bytes::{Buf, Bytes};
use futures_util::future::BoxFuture;
use futures_util::ready;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Handler taking over the raw bytes of an exchange.
pub type HijackFn = Box<dyn FnOnce(BoxIo) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// Response body produced by a handler that talks raw bytes.
///
/// An HTTP/1 server gives the handler the transport itself. Anything else
/// reading this body lazily starts the handler against a stream that reads
/// from `input` and writes into a fresh [`Writable`], which is what the
/// reader then sees.
pub(crate) struct Hijack {
    handler: Option<HijackFn>,
    input: Option<Body>,
    output: Option<Writable>,
}

impl Hijack {
    pub fn new(handler: HijackFn, input: Body) -> Self {
        Hijack {
            handler: Some(handler),
            input: Some(input),
            output: None,
        }
    }

    /// Take the handler before anything has been read.
    pub fn take(&mut self) -> Option<(HijackFn, Body)> {
        if self.output.is_some() {
            return None;
        }
        let handler = self.handler.take()?;
        let input = self.input.take().unwrap_or_default();
        Some((handler, input))
    }

    fn start(&mut self) -> &mut Writable {
        let handler = &mut self.handler;
        let input = &mut self.input;

        self.output.get_or_insert_with(|| {
            let output = Writable::new(DEFAULT_BOUND);

            if let Some(handler) = handler.take() {
                let input = input.take().unwrap_or_default();
                let stream = Duplex::new(BodyReader::new(input), output.clone());
                let done = output.clone();

                trace!("Start hijack handler");

                async_std::task::spawn(async move {
                    let res = handler(Box::new(stream)).await;
                    if let Err(e) = &res {
                        debug!("Hijack handler failed: {}", e);
                    }
                    done.close(res.err());
                });
            } else {
                output.close(None);
            }

            output
        })
    }

    pub fn poll_read(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        let output = self.start();
        super::Readable::poll_read(Pin::new(output), cx)
    }

    pub fn close(&mut self, error: Option<Error>) {
        self.handler = None;
        if let Some(mut input) = self.input.take() {
            input.close(None);
        }
        if let Some(output) = &self.output {
            output.close(error);
        }
    }
}

/// Reads a [`Body`] as a byte stream.
pub(crate) struct BodyReader {
    body: Body,
    chunk: Bytes,
}

impl BodyReader {
    pub fn new(body: Body) -> Self {
        BodyReader {
            body,
            chunk: Bytes::new(),
        }
    }
}

impl AsyncRead for BodyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        while this.chunk.is_empty() {
            match ready!(this.body.poll_read(cx)) {
                Ok(Some(chunk)) => this.chunk = chunk,
                Ok(None) => return Ok(0).into(),
                Err(e) => return Err(e.into()).into(),
            }
        }

        let max = buf.len().min(this.chunk.len());
        buf[..max].copy_from_slice(&this.chunk[..max]);
        this.chunk.advance(max);

        Ok(max).into()
    }
}
