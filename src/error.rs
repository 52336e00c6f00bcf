use crate::h2::Reason;
use std::fmt;
use std::io;

/// Possible errors from this crate.
#[derive(Debug)]
pub enum Error {
    /// A user/usage problem such as sending more bytes than a content-length header specifies.
    User(String),
    /// A wrapped std::io::Error from the underlying transport (socket).
    Io(io::Error),
    /// The request could not be written to the transport. Nothing observable
    /// reached the peer, so the request is always safe to send again.
    RequestNotSent(io::Error),
    /// HTTP/1.1 parse errors from the `httparse` crate.
    Http11Parser(httparse::Error),
    /// Http errors from the `http` crate.
    Http(http::Error),
    /// The peer sent malformed headers or frames.
    Protocol(String),
    /// An HTTP/2 stream was reset.
    Reset(Reason),
    /// The HTTP/2 peer sent GOAWAY while an exchange was in flight.
    GoAway(Reason),
    /// A request handler failed to produce a response.
    Application(String),
    /// A body or connection was closed before the operation completed.
    Closed,
}

/// Classification of an [`Error`] that decides whether a request may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing was transmitted. Always retried.
    RequestNotSent,
    /// The transport broke after sending started. Retried for idempotent requests only.
    TransportBroken,
    /// Malformed headers or frames. Never retried.
    Protocol,
    /// A handler failed while generating a response.
    Application,
    /// Usage error on the caller side.
    User,
}

impl Error {
    /// Classify this error.
    ///
    /// Anything that can't be proven "not sent" is treated as a broken transport,
    /// which only idempotent requests are retried for.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RequestNotSent(_) => ErrorKind::RequestNotSent,
            Error::Reset(Reason::RefusedStream) => ErrorKind::RequestNotSent,
            Error::Io(_) | Error::Reset(_) | Error::GoAway(_) | Error::Closed => {
                ErrorKind::TransportBroken
            }
            Error::Http11Parser(_) | Error::Protocol(_) => ErrorKind::Protocol,
            Error::Application(_) => ErrorKind::Application,
            Error::User(_) | Error::Http(_) => ErrorKind::User,
        }
    }

    /// Make a copy of this error to hand out to more than one waiter.
    ///
    /// io and http errors are not `Clone`, they are recreated from kind and message.
    pub fn duplicate(&self) -> Error {
        match self {
            Error::User(v) => Error::User(v.clone()),
            Error::Io(v) => Error::Io(io::Error::new(v.kind(), v.to_string())),
            Error::RequestNotSent(v) => {
                Error::RequestNotSent(io::Error::new(v.kind(), v.to_string()))
            }
            Error::Http11Parser(v) => Error::Http11Parser(*v),
            Error::Http(v) => Error::User(v.to_string()),
            Error::Protocol(v) => Error::Protocol(v.clone()),
            Error::Reset(v) => Error::Reset(*v),
            Error::GoAway(v) => Error::GoAway(*v),
            Error::Application(v) => Error::Application(v.clone()),
            Error::Closed => Error::Closed,
        }
    }

    /// Turn a transport failure that happened before anything was sent into
    /// `RequestNotSent`.
    pub(crate) fn into_not_sent(self) -> Error {
        match self {
            Error::Io(e) => Error::RequestNotSent(e),
            e => e,
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        if let Error::Io(e) = self {
            return e.kind() == io::ErrorKind::UnexpectedEof;
        }
        false
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::User(v) => write!(f, "{}", v),
            Error::Io(v) => fmt::Display::fmt(v, f),
            Error::RequestNotSent(v) => write!(f, "request not sent: {}", v),
            Error::Http11Parser(v) => write!(f, "http11 parser: {}", v),
            Error::Http(v) => write!(f, "http api: {}", v),
            Error::Protocol(v) => write!(f, "protocol error: {}", v),
            Error::Reset(v) => write!(f, "stream reset: {:?}", v),
            Error::GoAway(v) => write!(f, "connection going away: {:?}", v),
            Error::Application(v) => write!(f, "handler failed: {}", v),
            Error::Closed => write!(f, "closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Error::Http11Parser(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::RequestNotSent(e) => e,
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, "closed"),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
