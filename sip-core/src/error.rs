use sip_types::header::HeaderError;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Dns(#[from] hickory_resolver::ResolveError),
    #[error("request timed out")]
    RequestTimedOut,
    #[error("invalid argument, {0}")]
    InvalidArgument(String),
    #[error("no transport supports the requested protocol")]
    UnsupportedProtocol,
    #[error("failed to resolve a destination for the request")]
    NoDestination,
    #[error("connection was aborted before a response could be routed")]
    ConnectionAborted,
    #[error("network error, {0}")]
    NetworkError(#[source] io::Error),
    #[error("loop detected while resolving or retrying a request")]
    LoopDetected,
}
