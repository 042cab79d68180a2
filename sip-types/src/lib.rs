#![forbid(unsafe_code)]
//! SIP message types: URIs, headers and the message head parser.
//!
//! This crate only concerns itself with representing and (de)serializing SIP
//! message parts. It knows nothing about transports, transactions or dialogs.

#[macro_use]
mod macros;
#[macro_use]
pub mod print;
#[macro_use]
pub mod uri;
mod code;
pub mod header;
pub mod host;
mod method;
pub mod msg;
pub mod parse;

pub use code::{CodeKind, StatusCode};
pub use header::headers::Headers;
pub use header::name::Name;
pub use header::HeaderError;
pub use method::Method;

#[doc(hidden)]
pub mod _private_reexport {
    pub use bytes::Bytes;
    pub use internal::{identity, Finish, IResult};
    pub use nom;
}
