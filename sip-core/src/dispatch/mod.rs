//! A client-side SIP request dispatcher: RFC 3263 destination resolution,
//! transport/transaction attempts, response routing and failover, bundled
//! into a single `Dispatch` handle per outgoing request.
//!
//! See [`Dispatch::send`] for the stateful (responses expected) path and
//! [`Dispatch::send_connectionless`] for fire-and-forget requests like
//! out-of-dialog `ACK`-less `BYE` retries or `OPTIONS` keepalives that don't
//! need routing back to a caller.

mod loop_detect;
mod request;
mod resolve;
mod transport_select;

pub use loop_detect::LoopGuard;
pub use request::{AttemptDecorator, Dispatch, DispatchEvent, DispatchRegistry, SendParams};
pub use transport_select::TransportKind;
