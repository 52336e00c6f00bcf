//! Framer and reader shared by client and server connections.

use super::flow::Window;
use super::frame::{self, Frame, Reason};
use super::headers::{self, Fields};
use super::settings::{Param, Settings};
use super::stream::{Input, ResponseSender, Stream};
use crate::body::{Body, Writable, DEFAULT_BOUND};
use crate::io::BoxIo;
use crate::AsyncRead;
use crate::Error;
use bytes::Bytes;
use futures_channel::mpsc;
use futures_util::future::{poll_fn, AbortHandle};
use futures_util::io::{AsyncWriteExt, WriteHalf};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// A fully headered request waiting for a handler, with its stream id.
pub(crate) type Incoming = (u32, http::Request<Body>);

/// Serializes all writes to the transport.
///
/// Header blocks are HPACK encoded and written together with their
/// CONTINUATION frames while holding the lock, so the encoder state follows
/// the order the peer decodes in.
pub(crate) struct Framer {
    io: WriteHalf<BoxIo>,
    encoder: hpack::Encoder<'static>,
    buf: Vec<u8>,
}

impl Framer {
    pub fn new(io: WriteHalf<BoxIo>) -> Self {
        Framer {
            io,
            encoder: hpack::Encoder::new(),
            buf: Vec::with_capacity(16_384),
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), Error> {
        trace!("Send frame: {:?}", frame);
        self.buf.clear();
        frame.encode(&mut self.buf);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn send_headers(
        &mut self,
        stream_id: u32,
        fields: &Fields,
        end_stream: bool,
        max_frame_size: u32,
    ) -> Result<(), Error> {
        let block = self
            .encoder
            .encode(fields.iter().map(|(k, v)| (&k[..], &v[..])));

        self.buf.clear();

        let mut parts = block.chunks(max_frame_size as usize).peekable();
        let mut first = true;

        loop {
            let part = parts.next().unwrap_or(&[]);
            let end_headers = parts.peek().is_none();

            let frame = if first {
                Frame::Headers {
                    stream_id,
                    block: part.to_vec(),
                    end_stream,
                    end_headers,
                }
            } else {
                Frame::Continuation {
                    stream_id,
                    block: part.to_vec(),
                    end_headers,
                }
            };

            trace!("Send frame: {:?}", frame);
            frame.encode(&mut self.buf);

            first = false;

            if end_headers {
                break;
            }
        }

        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;

        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.io.close().await {
            trace!("Close transport failed: {}", e);
        }
    }
}

/// Why the reader stopped.
enum Stop {
    /// Transport failed, closed, or the peer went away.
    Remote(Error),
    /// The peer broke the protocol. Reported with GOAWAY.
    Violation(Reason, String),
}

impl From<Error> for Stop {
    fn from(e: Error) -> Self {
        match e {
            Error::Protocol(msg) => Stop::Violation(Reason::ProtocolError, msg),
            e => Stop::Remote(e),
        }
    }
}

fn violation<T>(reason: Reason, msg: &str) -> Result<T, Stop> {
    Err(Stop::Violation(reason, msg.to_string()))
}

/// State shared by the connection handle, the reader task, the control task
/// and every stream's body.
pub(crate) struct Shared {
    role: Role,
    local: Settings,
    state: Mutex<State>,
    writer: async_std::sync::Mutex<Framer>,
    /// Frames written by the control task, in order.
    control: mpsc::UnboundedSender<Frame>,
    reader: Mutex<Option<AbortHandle>>,
}

pub(crate) struct State {
    streams: HashMap<u32, Stream>,
    remote: Settings,
    /// Connection level credit for sending.
    send_window: Window,
    /// Connection level credit the peer has for sending.
    recv_window: Window,
    next_stream_id: u32,
    last_peer_stream: u32,
    closed: Option<Error>,
    goaway: bool,
    /// Outputs waiting for window credit.
    credit_wakers: Vec<Waker>,
    incoming: Option<mpsc::UnboundedSender<Incoming>>,
    count: usize,
}

impl State {
    fn wake_credit(&mut self) {
        for w in self.credit_wakers.drain(..) {
            w.wake();
        }
    }
}

fn not_sent(msg: &str) -> Error {
    Error::RequestNotSent(io::Error::new(io::ErrorKind::NotConnected, msg))
}

impl Shared {
    pub fn new(
        role: Role,
        local: Settings,
        remote: Settings,
        framer: Framer,
        control: mpsc::UnboundedSender<Frame>,
    ) -> (Arc<Shared>, Option<mpsc::UnboundedReceiver<Incoming>>) {
        let (incoming, rx) = match role {
            Role::Client => (None, None),
            Role::Server => {
                let (tx, rx) = mpsc::unbounded();
                (Some(tx), Some(rx))
            }
        };

        let state = State {
            streams: HashMap::new(),
            remote,
            send_window: Window::new(super::settings::DEFAULT_WINDOW_SIZE),
            recv_window: Window::new(super::settings::DEFAULT_WINDOW_SIZE),
            next_stream_id: 1,
            last_peer_stream: 0,
            closed: None,
            goaway: false,
            credit_wakers: vec![],
            incoming,
            count: 0,
        };

        let shared = Shared {
            role,
            local,
            state: Mutex::new(state),
            writer: async_std::sync::Mutex::new(framer),
            control,
            reader: Mutex::new(None),
        };

        (Arc::new(shared), rx)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_reader(&self, handle: AbortHandle) {
        *self.reader.lock().unwrap() = Some(handle);
    }

    /// Queue a frame for the control task.
    fn queue(&self, frame: Frame) {
        if self.control.unbounded_send(frame).is_err() {
            trace!("Control channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Not closed and the peer hasn't sent GOAWAY.
    pub fn is_open(&self) -> bool {
        let st = self.lock();
        st.closed.is_none() && !st.goaway
    }

    /// Max concurrent streams the peer accepts from us.
    pub fn concurrency(&self) -> usize {
        let st = self.lock();
        match self.role {
            Role::Client => st
                .remote
                .max_concurrent_streams
                .unwrap_or(super::settings::DEFAULT_MAX_CONCURRENT_STREAMS) as usize,
            Role::Server => self.local.max_concurrent_streams.unwrap_or(u32::MAX) as usize,
        }
    }

    pub fn count(&self) -> usize {
        self.lock().count
    }

    pub fn active_streams(&self) -> usize {
        self.lock().streams.len()
    }

    /// Open a client stream and send its headers.
    ///
    /// The id is allocated while holding the writer, so new streams reach
    /// the peer in increasing order. Nothing is sent on failure.
    pub async fn open_stream(
        &self,
        response: ResponseSender,
        fields: Fields,
        end_stream: bool,
    ) -> Result<u32, Error> {
        let mut framer = self.writer.lock().await;

        let stream_id = self.new_stream(response)?;
        let max = self.lock().remote.max_frame_size;

        if let Err(e) = framer
            .send_headers(stream_id, &fields, end_stream, max)
            .await
        {
            self.lock().streams.remove(&stream_id);
            self.shutdown(e.duplicate());
            return Err(e.into_not_sent());
        }

        Ok(stream_id)
    }

    /// Allocate the next client stream id.
    fn new_stream(&self, response: ResponseSender) -> Result<u32, Error> {
        let mut st = self.lock();

        if st.closed.is_some() {
            return Err(not_sent("Connection is closed"));
        }
        if st.goaway {
            return Err(not_sent("Connection is going away"));
        }

        let stream_id = st.next_stream_id;

        if stream_id > 0x7fff_ffff {
            st.goaway = true;
            return Err(not_sent("Stream ids exhausted"));
        }

        st.next_stream_id += 2;
        st.count += 1;

        let stream = Stream::new(
            st.remote.initial_window_size,
            self.local.initial_window_size,
            Some(response),
        );
        st.streams.insert(stream_id, stream);

        Ok(stream_id)
    }

    pub async fn send_headers(
        &self,
        stream_id: u32,
        fields: Fields,
        end_stream: bool,
    ) -> Result<(), Error> {
        let max = self.lock().remote.max_frame_size;

        let mut framer = self.writer.lock().await;

        if let Some(e) = &self.lock().closed {
            return Err(e.duplicate());
        }

        let res = framer
            .send_headers(stream_id, &fields, end_stream, max)
            .await;

        if let Err(e) = &res {
            self.shutdown(e.duplicate());
        }

        res
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), Error> {
        let mut framer = self.writer.lock().await;

        if let Some(e) = &self.lock().closed {
            return Err(e.duplicate());
        }

        let res = framer.send(&frame).await;

        if let Err(e) = &res {
            self.shutdown(e.duplicate());
        }

        res
    }

    /// Wait for credit to send up to `wanted` bytes on a stream.
    ///
    /// The returned amount is already taken from both the stream and the
    /// connection window.
    pub async fn reserve(&self, stream_id: u32, wanted: usize) -> Result<usize, Error> {
        poll_fn(|cx| {
            let mut guard = self.lock();
            let st = &mut *guard;

            if let Some(e) = &st.closed {
                return Poll::Ready(Err(e.duplicate()));
            }

            let stream = match st.streams.get_mut(&stream_id) {
                Some(s) => s,
                None => return Poll::Ready(Err(Error::Reset(Reason::StreamClosed))),
            };

            let amount = (wanted.min(u32::MAX as usize) as u32)
                .min(stream.send_window.available())
                .min(st.send_window.available())
                .min(st.remote.max_frame_size);

            if amount == 0 {
                trace!("Stream {} waits for window credit", stream_id);
                st.credit_wakers.push(cx.waker().clone());
                return Poll::Pending;
            }

            stream.send_window.take(amount);
            st.send_window.take(amount);

            Poll::Ready(Ok(amount as usize))
        })
        .await
    }

    /// We have sent END_STREAM.
    pub fn close_local(&self, stream_id: u32) {
        let mut st = self.lock();
        if let Some(s) = st.streams.get_mut(&stream_id) {
            s.local_closed = true;
            if s.is_closed() {
                st.streams.remove(&stream_id);
            }
        }
    }

    /// Response is complete. A request body still arriving is cut off.
    pub fn finish_response(&self, stream_id: u32) {
        let still_open = self.lock().streams.contains_key(&stream_id);
        if still_open {
            self.reset(stream_id, Reason::NoError);
        }
    }

    /// Remove a stream, handing `error` to its waiters.
    fn remove_stream(&self, stream_id: u32, error: Error) -> bool {
        let stream = {
            let mut st = self.lock();
            let stream = st.streams.remove(&stream_id);
            st.wake_credit();
            stream
        };

        match stream {
            Some(s) => {
                s.fail(&error);
                true
            }
            None => false,
        }
    }

    /// Reset a stream from our side.
    pub fn reset(&self, stream_id: u32, reason: Reason) {
        debug!("Reset stream {}: {:?}", stream_id, reason);
        if self.remove_stream(stream_id, Error::Reset(reason)) {
            self.queue(Frame::RstStream { stream_id, reason });
        }
    }

    /// The reader of a stream's input consumed `amount` bytes.
    pub fn release_capacity(&self, stream_id: u32, amount: u32) {
        if amount == 0 {
            return;
        }

        let mut guard = self.lock();
        let st = &mut *guard;

        if st.closed.is_some() {
            return;
        }

        st.recv_window.release(amount);
        self.queue(Frame::WindowUpdate {
            stream_id: 0,
            increment: amount,
        });

        if let Some(s) = st.streams.get_mut(&stream_id) {
            if !s.remote_closed {
                s.recv_window.release(amount);
                self.queue(Frame::WindowUpdate {
                    stream_id,
                    increment: amount,
                });
            }
        }
    }

    /// The reader dropped a stream's input before the end.
    pub fn input_closed(&self, stream_id: u32) {
        if self.role == Role::Server {
            // further DATA is discarded, the response can still be sent.
            return;
        }

        let remote_open = self
            .lock()
            .streams
            .get(&stream_id)
            .map(|s| !s.remote_closed)
            .unwrap_or(false);

        if remote_open {
            self.reset(stream_id, Reason::Cancel);
        }
    }

    /// Fail everything with `error`. Only the first call has an effect.
    pub fn shutdown(&self, error: Error) {
        let streams = {
            let mut st = self.lock();
            if st.closed.is_some() {
                return;
            }
            debug!("Connection shutdown: {}", error);
            st.closed = Some(error.duplicate());
            st.incoming = None;
            st.wake_credit();
            mem::take(&mut st.streams)
        };

        for (_, s) in streams {
            s.fail(&error);
        }

        self.control.close_channel();
    }

    /// Close from our side, telling the peer with GOAWAY.
    pub async fn close(&self, error: Option<Error>) {
        let last = {
            let st = self.lock();
            if st.closed.is_some() {
                None
            } else {
                Some(st.last_peer_stream)
            }
        };

        let mut framer = self.writer.lock().await;

        if let Some(last_stream_id) = last {
            let goaway = Frame::GoAway {
                last_stream_id,
                reason: Reason::NoError,
            };
            if let Err(e) = framer.send(&goaway).await {
                trace!("GOAWAY not sent: {}", e);
            }
        }

        self.shutdown(error.unwrap_or(Error::Closed));

        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }

        framer.close().await;
    }
}

/// Write queued control frames until the connection shuts down.
pub(crate) async fn control_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.next().await {
        let res = {
            let mut framer = shared.writer.lock().await;
            framer.send(&frame).await
        };

        if let Err(e) = res {
            debug!("Control write failed: {}", e);
            shared.shutdown(e);
            break;
        }
    }

    trace!("Control loop ended");
}

/// Read and dispatch frames until the transport closes or fails.
pub(crate) async fn read_loop<R: AsyncRead + Unpin>(shared: Arc<Shared>, mut reader: R) {
    let mut decoder = hpack::Decoder::new();

    let res = shared.read_frames(&mut reader, &mut decoder).await;

    let error = match res {
        Ok(()) => Error::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "Connection closed by peer",
        )),
        Err(Stop::Remote(e)) => e,
        Err(Stop::Violation(reason, msg)) => {
            warn!("Peer protocol violation ({:?}): {}", reason, msg);
            let last_stream_id = shared.lock().last_peer_stream;
            let goaway = Frame::GoAway {
                last_stream_id,
                reason,
            };
            let mut framer = shared.writer.lock().await;
            if let Err(e) = framer.send(&goaway).await {
                trace!("GOAWAY not sent: {}", e);
            }
            framer.close().await;
            Error::Protocol(msg)
        }
    };

    shared.shutdown(error);
}

impl Shared {
    async fn read_frames<R: AsyncRead + Unpin>(
        self: &Arc<Self>,
        reader: &mut R,
        decoder: &mut hpack::Decoder<'static>,
    ) -> Result<(), Stop> {
        // header block waiting for CONTINUATION
        let mut pending: Option<(u32, Vec<u8>, bool)> = None;

        loop {
            let frame = match frame::read_frame(reader, self.local.max_frame_size).await? {
                Some(f) => f,
                None => return Ok(()),
            };

            if let Some((pending_id, _, _)) = &pending {
                let continues = matches!(
                    frame,
                    Frame::Continuation { stream_id, .. } if stream_id == *pending_id
                );
                if !continues {
                    return violation(Reason::ProtocolError, "Expected CONTINUATION");
                }
            }

            match frame {
                Frame::Data {
                    stream_id,
                    payload,
                    end_stream,
                    flow_len,
                } => self.on_data(stream_id, payload, end_stream, flow_len)?,

                Frame::Headers {
                    stream_id,
                    block,
                    end_stream,
                    end_headers,
                } => {
                    if end_headers {
                        self.on_headers(decoder, stream_id, block, end_stream)?;
                    } else {
                        pending = Some((stream_id, block, end_stream));
                    }
                }

                Frame::Continuation {
                    stream_id,
                    block,
                    end_headers,
                } => {
                    let (_, mut acc, end_stream) = match pending.take() {
                        Some(p) => p,
                        None => return violation(Reason::ProtocolError, "Unexpected CONTINUATION"),
                    };
                    acc.extend_from_slice(&block);
                    if end_headers {
                        self.on_headers(decoder, stream_id, acc, end_stream)?;
                    } else {
                        pending = Some((stream_id, acc, end_stream));
                    }
                }

                Frame::Priority { .. } => {}

                Frame::RstStream { stream_id, reason } => {
                    debug!("Peer reset stream {}: {:?}", stream_id, reason);
                    self.remove_stream(stream_id, Error::Reset(reason));
                }

                Frame::Settings { ack: true, .. } => {
                    trace!("Settings acknowledged");
                }

                Frame::Settings { ack: false, params } => self.on_settings(&params)?,

                Frame::PushPromise { .. } => {
                    // we never enable push
                    return violation(Reason::ProtocolError, "PUSH_PROMISE when push is disabled");
                }

                Frame::Ping { ack: false, payload } => {
                    self.queue(Frame::Ping { ack: true, payload });
                }

                Frame::Ping { ack: true, .. } => {}

                Frame::GoAway {
                    last_stream_id,
                    reason,
                } => self.on_goaway(last_stream_id, reason)?,

                Frame::WindowUpdate {
                    stream_id,
                    increment,
                } => self.on_window_update(stream_id, increment)?,

                Frame::Unknown { kind, .. } => {
                    trace!("Ignore unknown frame type: {}", kind);
                }
            }
        }
    }

    fn on_data(
        self: &Arc<Self>,
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        flow_len: u32,
    ) -> Result<(), Stop> {
        let mut guard = self.lock();
        let st = &mut *guard;

        if st.recv_window.consume(flow_len).is_err() {
            return violation(Reason::FlowControlError, "Connection window exceeded");
        }

        let len = payload.len() as u32;

        // padding is never seen by the reader, give it back right away.
        let mut credit_conn = flow_len - len;
        let mut credit_stream = credit_conn;
        let mut stream_error = None;

        match st.streams.get_mut(&stream_id) {
            Some(s) if s.headers_done && !s.remote_closed => {
                if s.recv_window.consume(flow_len).is_err() {
                    return violation(Reason::FlowControlError, "Stream window exceeded");
                }

                if len > 0 {
                    let delivered = s
                        .input
                        .as_ref()
                        .map(|w| w.try_write(payload).is_ok())
                        .unwrap_or(false);

                    if !delivered {
                        // reader is gone, discard
                        credit_conn += len;
                        credit_stream += len;
                    }
                }

                if end_stream {
                    s.close_remote();
                    credit_stream = 0;
                    if s.is_closed() {
                        st.streams.remove(&stream_id);
                    }
                }
            }
            Some(_) => {
                credit_conn = flow_len;
                credit_stream = 0;
                stream_error = Some(Reason::StreamClosed);
            }
            None => {
                credit_conn = flow_len;
                credit_stream = 0;
            }
        }

        if credit_conn > 0 {
            st.recv_window.release(credit_conn);
            self.queue(Frame::WindowUpdate {
                stream_id: 0,
                increment: credit_conn,
            });
        }

        if credit_stream > 0 {
            if let Some(s) = st.streams.get_mut(&stream_id) {
                s.recv_window.release(credit_stream);
                self.queue(Frame::WindowUpdate {
                    stream_id,
                    increment: credit_stream,
                });
            }
        }

        drop(guard);

        if let Some(reason) = stream_error {
            self.reset(stream_id, reason);
        }

        Ok(())
    }

    fn on_headers(
        self: &Arc<Self>,
        decoder: &mut hpack::Decoder<'static>,
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
    ) -> Result<(), Stop> {
        let fields = match decoder.decode(&block) {
            Ok(v) => v,
            Err(e) => {
                return violation(Reason::CompressionError, &format!("HPACK: {:?}", e));
            }
        };

        match self.role {
            Role::Client => self.on_response_headers(stream_id, fields, end_stream),
            Role::Server => self.on_request_headers(stream_id, fields, end_stream),
        }
    }

    /// Headers after the initial ones are trailers, dropped.
    fn on_trailers(st: &mut State, stream_id: u32, end_stream: bool) -> Result<(), Stop> {
        if !end_stream {
            return violation(Reason::ProtocolError, "Trailers without END_STREAM");
        }

        trace!("Drop trailers on stream {}", stream_id);

        if let Some(s) = st.streams.get_mut(&stream_id) {
            s.close_remote();
            if s.is_closed() {
                st.streams.remove(&stream_id);
            }
        }

        Ok(())
    }

    fn input_body(
        self: &Arc<Self>,
        stream: &mut Stream,
        stream_id: u32,
        headers: &http::HeaderMap,
        end_stream: bool,
    ) -> Body {
        if end_stream {
            stream.remote_closed = true;
            return Body::empty();
        }

        let writable = match headers::content_length(headers) {
            Some(n) => Writable::with_length(DEFAULT_BOUND, n),
            None => Writable::new(DEFAULT_BOUND),
        };
        stream.input = Some(writable.clone());

        Body::new(Input::new(stream_id, writable, self.clone()))
    }

    fn on_response_headers(
        self: &Arc<Self>,
        stream_id: u32,
        fields: Fields,
        end_stream: bool,
    ) -> Result<(), Stop> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let stream = match st.streams.get_mut(&stream_id) {
            Some(s) => s,
            None => {
                if stream_id % 2 == 0 || stream_id >= st.next_stream_id {
                    return violation(Reason::ProtocolError, "HEADERS on idle stream");
                }
                trace!("HEADERS on closed stream {}", stream_id);
                return Ok(());
            }
        };

        if stream.headers_done {
            return Shared::on_trailers(st, stream_id, end_stream);
        }

        let res = match headers::parse_response(fields) {
            Ok(v) => v,
            Err(e) => {
                drop(guard);
                debug!("Bad response headers on stream {}: {}", stream_id, e);
                if self.remove_stream(stream_id, e) {
                    self.queue(Frame::RstStream {
                        stream_id,
                        reason: Reason::ProtocolError,
                    });
                }
                return Ok(());
            }
        };

        if res.status().is_informational() {
            trace!("Ignore informational response: {}", res.status());
            return Ok(());
        }

        stream.headers_done = true;

        let body = self.input_body(stream, stream_id, res.headers(), end_stream);
        let tx = stream.response.take();

        if stream.is_closed() {
            st.streams.remove(&stream_id);
        }

        drop(guard);

        let res = res.map(|_| body);

        if let Some(tx) = tx {
            if tx.send(Ok(res)).is_err() {
                // caller gave up, dropping the response resets the stream.
                trace!("Response on stream {} not awaited", stream_id);
            }
        }

        Ok(())
    }

    fn on_request_headers(
        self: &Arc<Self>,
        stream_id: u32,
        fields: Fields,
        end_stream: bool,
    ) -> Result<(), Stop> {
        let mut guard = self.lock();
        let st = &mut *guard;

        if st.streams.get(&stream_id).map(|s| s.headers_done) == Some(true) {
            return Shared::on_trailers(st, stream_id, end_stream);
        }

        if stream_id % 2 == 0 {
            return violation(Reason::ProtocolError, "Unexpected stream id");
        }

        if stream_id <= st.last_peer_stream {
            // closed from our side, the peer may not have seen it yet.
            trace!("HEADERS on closed stream {}", stream_id);
            return Ok(());
        }
        st.last_peer_stream = stream_id;

        let max = self.local.max_concurrent_streams.unwrap_or(u32::MAX) as usize;

        if st.closed.is_some() || st.goaway || st.incoming.is_none() || st.streams.len() >= max
        {
            debug!("Refuse stream {}", stream_id);
            self.queue(Frame::RstStream {
                stream_id,
                reason: Reason::RefusedStream,
            });
            return Ok(());
        }

        let req = match headers::parse_request(fields) {
            Ok(v) => v,
            Err(e) => {
                debug!("Bad request headers on stream {}: {}", stream_id, e);
                self.queue(Frame::RstStream {
                    stream_id,
                    reason: Reason::ProtocolError,
                });
                return Ok(());
            }
        };

        let mut stream = Stream::new(
            st.remote.initial_window_size,
            self.local.initial_window_size,
            None,
        );
        stream.headers_done = true;

        let body = self.input_body(&mut stream, stream_id, req.headers(), end_stream);

        st.streams.insert(stream_id, stream);
        st.count += 1;

        let incoming = st.incoming.clone();

        drop(guard);

        let req = req.map(|_| body);

        let sent = incoming
            .map(|tx| tx.unbounded_send((stream_id, req)).is_ok())
            .unwrap_or(false);

        if !sent {
            self.reset(stream_id, Reason::RefusedStream);
        }

        Ok(())
    }

    fn on_settings(&self, params: &[Param]) -> Result<(), Stop> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let old = st.remote.initial_window_size;
        st.remote.apply(params);
        let delta = i64::from(st.remote.initial_window_size) - i64::from(old);

        if delta != 0 {
            for s in st.streams.values_mut() {
                if s.send_window.adjust(delta).is_err() {
                    return violation(
                        Reason::FlowControlError,
                        "Window overflow by INITIAL_WINDOW_SIZE",
                    );
                }
            }
        }

        debug!("Remote settings: {:?}", st.remote);

        st.wake_credit();

        self.queue(Frame::Settings {
            ack: true,
            params: vec![],
        });

        Ok(())
    }

    fn on_window_update(&self, stream_id: u32, increment: u32) -> Result<(), Stop> {
        if increment == 0 {
            if stream_id == 0 {
                return violation(Reason::ProtocolError, "WINDOW_UPDATE with 0 increment");
            }
            self.reset(stream_id, Reason::ProtocolError);
            return Ok(());
        }

        let mut guard = self.lock();
        let st = &mut *guard;

        if stream_id == 0 {
            if st.send_window.increase(increment).is_err() {
                return violation(Reason::FlowControlError, "Connection window overflow");
            }
        } else if let Some(s) = st.streams.get_mut(&stream_id) {
            if s.send_window.increase(increment).is_err() {
                drop(guard);
                self.reset(stream_id, Reason::FlowControlError);
                return Ok(());
            }
        }

        st.wake_credit();

        Ok(())
    }

    fn on_goaway(&self, last_stream_id: u32, reason: Reason) -> Result<(), Stop> {
        let ours = match self.role {
            Role::Client => 1,
            Role::Server => 0,
        };

        let (refused, active) = {
            let mut st = self.lock();
            st.goaway = true;

            let refused: Vec<u32> = st
                .streams
                .keys()
                .copied()
                .filter(|id| id % 2 == ours && *id > last_stream_id)
                .collect();

            (refused.clone(), st.streams.len() - refused.len())
        };

        // never processed by the peer, safe to send elsewhere.
        for stream_id in refused {
            self.remove_stream(stream_id, Error::Reset(Reason::RefusedStream));
        }

        if active > 0 {
            warn!("GOAWAY ({:?}) with {} active streams", reason, active);
            return Err(Stop::Remote(Error::GoAway(reason)));
        }

        debug!("GOAWAY ({:?}) without active streams", reason);

        Ok(())
    }
}
