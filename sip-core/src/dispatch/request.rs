//! The dispatch engine itself: [`Dispatch`] drives a single outgoing request
//! through RFC 3263 resolution, transport/transaction attempts, and failover,
//! fulfilling the "exactly one terminal delivery" invariant of a stateful
//! request and the fire-and-forget contract of a non-stateful one.

use super::resolve::Resolution;
use super::transport_select::TransportKind;
use crate::transaction::{ClientInvTsx, ClientTsx, TsxKey, TsxResponse};
use crate::transport::{OutgoingParts, OutgoingRequest, TargetTransportInfo, TpHandle};
use crate::{Endpoint, Error, Request, Response, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use sip_types::header::typed::CSeq;
use sip_types::host::Host;
use sip_types::msg::RequestLine;
use sip_types::uri::SipUri;
use sip_types::{CodeKind, Headers, Method, Name, StatusCode};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

/// Per-attempt hook used to add headers (e.g. `Authorization`) once the
/// transport, local address and destination of an attempt are known.
///
/// The Rust-native rendering of the spec's `send_cb(transport, laddr, dst,
/// prepend_buffer, &continuation)`: because requests here already carry a
/// structured [`Headers`] rather than a raw byte buffer, "prepend" and
/// "continuation" both collapse into ordinary header insertion.
pub type AttemptDecorator = dyn FnMut(TransportKind, &TpHandle, SocketAddr, &mut Headers) + Send;

/// Parameters for one dispatched request, consumed by [`Dispatch::send`] or
/// [`Dispatch::send_connectionless`].
pub struct SendParams {
    /// The request-line, headers and body to send. Preserved verbatim across
    /// every attempt except for the freshly generated `Via` header and
    /// whatever `decorate` adds.
    pub request: Request,

    /// The URI that anchors DNS resolution (RFC 3263 §4's "target"). Usually
    /// equal to `request.line.uri`, but may differ when routing via an
    /// outbound proxy. Must use the `sip` scheme: `sips` is not accepted
    /// here because secure transport selection happens via `initial_transport`
    /// / the URI's `transport` parameter, never via URI scheme, at this layer.
    pub route: SipUri,

    /// Opaque tie-break salt for deterministic DNS record ordering (session
    /// affinity). Two `send`s with the same `sort_key` against the same
    /// answers produce the same candidate order.
    pub sort_key: u64,

    /// Caller-pinned transport (e.g. from a `Route` header already known to
    /// require TLS), overridden by the route URI's own `transport` parameter
    /// if present.
    pub initial_transport: Option<TransportKind>,

    /// Per-attempt header decoration (see [`AttemptDecorator`]).
    pub decorate: Option<Box<AttemptDecorator>>,
}

/// One event delivered from an in-flight stateful [`Dispatch`].
#[derive(Debug)]
pub enum DispatchEvent {
    /// A 1xx response. Delivered zero or more times; never terminal.
    Provisional(Response),
    /// The terminal delivery: either the final (>=200) response actually
    /// received, or the error that ended resolution/attempts/transactions.
    /// Delivered exactly once, as the last event before the channel closes.
    Final(Result<Response>),
}

/// Handle to an in-flight stateful dispatch.
///
/// Poll with [`Dispatch::next_response`] until it returns `None`. Dropping a
/// `Dispatch` while it is still in flight cancels it (spec §4.F "external
/// drop"); the driving task keeps running detached so the in-flight
/// transaction is torn down cleanly instead of being aborted mid-flight.
pub struct Dispatch {
    events: mpsc::UnboundedReceiver<DispatchEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
    done: bool,
}

/// The part of a registered dispatch a [`DispatchRegistry`] needs to force
/// it closed: a handle to abort the driving task, and the channel to push
/// the terminal event through once aborted.
///
/// Held by the task-keepalive future spawned alongside `run_stateful`
/// (see [`Dispatch::send`]), so it lives exactly as long as the dispatch is
/// actually in flight; [`DispatchRegistry`] only ever holds a [`Weak`] to
/// it, mirroring how `sip->reql` holds plain links to requests that unlink
/// themselves on completion.
struct RegisteredDispatch {
    abort: AbortHandle,
    events: mpsc::UnboundedSender<DispatchEvent>,
}

/// Registry of in-flight stateful dispatches for a stack, consulted by
/// [`DispatchRegistry::close_all`] exactly as `sip->reql` is consulted by
/// `sip_request_close` (spec §4.F / §6 `close_all`).
///
/// Cheap to clone (an `Arc` internally); share one instance across every
/// [`Dispatch::send`] call that should be reachable from the same
/// `close_all`.
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    entries: Arc<Mutex<Vec<Weak<RegisteredDispatch>>>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, entry: &Arc<RegisteredDispatch>) {
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        entries.push(Arc::downgrade(entry));
    }

    /// Abort every dispatch currently registered here with
    /// `ConnectionAborted`, matching spec §4.F: "iterate all registered
    /// Requests; release in-flight DNS and transactions; terminate each
    /// with `ECONNABORTED`".
    pub fn close_all(&self) {
        for weak in self.entries.lock().drain(..) {
            if let Some(entry) = weak.upgrade() {
                entry.abort.abort();
                let _ = entry
                    .events
                    .send(DispatchEvent::Final(Err(Error::ConnectionAborted)));
            }
        }
    }
}

impl Dispatch {
    /// Dispatch a stateful request: resolves, attempts, and fails over in a
    /// detached task, returning a handle to observe responses and cancel.
    ///
    /// `registry`, when given, makes this dispatch reachable from
    /// [`DispatchRegistry::close_all`] for as long as it stays in flight —
    /// pass the same registry to every `send` call that belongs to the same
    /// stack so a stack-wide shutdown can abort all of them at once.
    #[tracing::instrument(level = "debug", skip(endpoint, params, registry), fields(method = %params.request.line.method))]
    pub fn send(
        endpoint: Endpoint,
        params: SendParams,
        registry: Option<&DispatchRegistry>,
    ) -> Result<Dispatch> {
        if params.request.line.method == Method::ACK {
            return Err(Error::InvalidArgument(
                "ACK cannot be dispatched as a standalone request".into(),
            ));
        }

        let (host, explicit_port, maddr, uri_transport) = route_params(&params.route)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let transport = uri_transport.or(params.initial_transport);
        let resolution = Resolution::new(host, explicit_port, maddr, transport, params.sort_key);

        let join = tokio::spawn(run_stateful(
            endpoint,
            params,
            resolution,
            events_tx.clone(),
            cancel_rx,
        ));

        if let Some(registry) = registry {
            let entry = Arc::new(RegisteredDispatch {
                abort: join.abort_handle(),
                events: events_tx,
            });
            registry.register(&entry);

            // Keep `entry` alive for exactly as long as `run_stateful` runs:
            // once it returns (normally, on cancellation, or aborted by
            // `close_all`), this wrapper task ends and the registry's `Weak`
            // goes stale on its own.
            tokio::spawn(async move {
                let _entry = entry;
                let _ = join.await;
            });
        }

        Ok(Dispatch {
            events: events_rx,
            cancel_tx: Some(cancel_tx),
            done: false,
        })
    }

    /// Dispatch a fire-and-forget request: attempted once per resolved
    /// candidate on send-initiation failure, but never retried once bytes
    /// have actually gone out (spec §4.D.5) and never produces a response
    /// callback.
    #[tracing::instrument(level = "debug", skip(endpoint, params), fields(method = %params.request.line.method))]
    pub async fn send_connectionless(endpoint: &Endpoint, mut params: SendParams) -> Result<()> {
        if params.request.line.method == Method::ACK {
            return Err(Error::InvalidArgument(
                "ACK cannot be dispatched as a standalone request".into(),
            ));
        }

        let (host, explicit_port, maddr, uri_transport) = route_params(&params.route)?;
        let transport = uri_transport.or(params.initial_transport);
        let mut resolution = Resolution::new(host, explicit_port, maddr, transport, params.sort_key);

        let (transport, tp, dst) =
            next_connected_candidate(endpoint, &mut resolution, &params.route).await?;

        let mut request = params.request.clone();
        if let Some(decorate) = params.decorate.as_mut() {
            decorate(transport, &tp, dst, &mut request.headers);
        }

        let via = endpoint.create_via(&tp, &TsxKey::client(&request.line.method), None);
        request.headers.insert_named_front(&via);

        let mut outgoing = OutgoingRequest {
            msg: request,
            parts: OutgoingParts {
                transport: tp,
                destination: dst,
                buffer: Default::default(),
            },
        };

        endpoint
            .send_outgoing_request(&mut outgoing)
            .await
            .map_err(Error::from)
    }

    /// Wait for the next event. Returns `None` once the terminal event has
    /// already been delivered (or the dispatch was dropped mid-flight).
    pub async fn next_response(&mut self) -> Option<DispatchEvent> {
        if self.done {
            return None;
        }

        let event = self.events.recv().await;

        if matches!(event, Some(DispatchEvent::Final(_)) | None) {
            self.done = true;
        }

        event
    }

    /// Request cancellation (spec §4.F). Idempotent. If no provisional has
    /// arrived yet the cancellation is latent and applied on the next
    /// provisional; if one already arrived, a CANCEL is issued immediately.
    pub fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        if !self.done {
            self.cancel();
        }
    }
}

/// Extract the resolution-relevant parts of a route URI: the host to
/// resolve (overridden by `maddr` at use-time, not here), any explicit port,
/// `maddr` itself, and a transport pinned by the `transport=` URI parameter.
fn route_params(route: &SipUri) -> Result<(Host, Option<u16>, Option<Host>, Option<TransportKind>)> {
    if route.sips {
        return Err(Error::InvalidArgument(
            "route uri must use the sip scheme; tls is selected via transport, not sips".into(),
        ));
    }

    let maddr = route
        .uri_params
        .get_val("maddr")
        .map(|v| Host::from_str(v.as_str()))
        .transpose()?;

    let transport = route
        .uri_params
        .get_val("transport")
        .map(|v| TransportKind::decode(v.as_str()).ok_or(Error::UnsupportedProtocol))
        .transpose()?;

    Ok((
        route.host_port.host.clone(),
        route.host_port.port,
        maddr,
        transport,
    ))
}

/// Advance `resolution` until a candidate connects, skipping (but not
/// retrying) candidates whose transport cannot be obtained at all — the
/// "send-initiation error re-enters the loop" case of spec §4.C.
async fn next_connected_candidate(
    endpoint: &Endpoint,
    resolution: &mut Resolution,
    route: &SipUri,
) -> Result<(TransportKind, TpHandle, SocketAddr)> {
    loop {
        match resolution.next_candidate(endpoint).await? {
            None => return Err(Error::NoDestination),
            Some((transport, dst)) => {
                match endpoint
                    .transports()
                    .connect_to(endpoint, route, transport.as_str(), dst)
                    .await
                {
                    Ok(tp) => return Ok((transport, tp, dst)),
                    Err(e) => {
                        log::debug!("failed to obtain {transport:?} transport to {dst}: {e}");
                    }
                }
            }
        }
    }
}

fn is_retriable(error: &Error) -> bool {
    matches!(error, Error::NetworkError(_) | Error::RequestTimedOut | Error::Io(_))
}

/// The stateful attempt + Response Router loop (spec §4.D / §4.E), run on
/// its own task so [`Dispatch::send`] can return immediately.
async fn run_stateful(
    endpoint: Endpoint,
    mut params: SendParams,
    mut resolution: Resolution,
    events: mpsc::UnboundedSender<DispatchEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let method = params.request.line.method.clone();
    let mut canceled = false;

    loop {
        if !canceled {
            if let Ok(()) = cancel_rx.try_recv() {
                canceled = true;
            }
        }

        if canceled {
            let _ = events.send(DispatchEvent::Final(Err(Error::ConnectionAborted)));
            return;
        }

        let (transport, tp, dst) =
            match next_connected_candidate(&endpoint, &mut resolution, &params.route).await {
                Ok(v) => v,
                Err(e) => {
                    let _ = events.send(DispatchEvent::Final(Err(e)));
                    return;
                }
            };

        let mut request = params.request.clone();
        if let Some(decorate) = params.decorate.as_mut() {
            decorate(transport, &tp, dst, &mut request.headers);
        }

        let mut target = TargetTransportInfo {
            via_host_port: None,
            transport: Some((tp, dst)),
        };

        let mut tsx = if method == Method::INVITE {
            match endpoint.send_invite(request, &mut target).await {
                Ok(tsx) => TsxHandle::Invite(tsx),
                Err(e) => {
                    log::debug!("attempt to {dst} over {transport:?} failed to initiate: {e}");
                    continue;
                }
            }
        } else {
            match endpoint.send_request(request, &mut target).await {
                Ok(tsx) => TsxHandle::NonInvite(tsx),
                Err(e) => {
                    log::debug!("attempt to {dst} over {transport:?} failed to initiate: {e}");
                    continue;
                }
            }
        };

        match drive_transaction(&mut tsx, &mut cancel_rx, &mut canceled, &events).await {
            DriveOutcome::Final(response) => {
                let retriable_final = !canceled
                    && response.line.code == StatusCode::SERVICE_UNAVAILABLE
                    && resolution.has_queued();

                if retriable_final {
                    log::debug!("503 from {dst}, {} candidate(s) remain", "more");
                    continue;
                }

                let _ = events.send(DispatchEvent::Final(Ok(response)));
                return;
            }
            DriveOutcome::Error(err) => {
                let retriable = !canceled && is_retriable(&err) && resolution.has_queued();

                if retriable {
                    log::debug!("attempt to {dst} failed: {err}, retrying next candidate");
                    continue;
                }

                let _ = events.send(DispatchEvent::Final(Err(err)));
                return;
            }
        }
    }
}

enum TsxHandle {
    Invite(ClientInvTsx),
    NonInvite(ClientTsx),
}

impl TsxHandle {
    async fn receive_msg(&mut self) -> Result<Option<TsxResponse>> {
        match self {
            TsxHandle::Invite(tsx) => tsx.receive().await,
            TsxHandle::NonInvite(tsx) => tsx.receive().await.map(Some),
        }
    }
}

enum DriveOutcome {
    Final(Response),
    Error(Error),
}

fn to_response(resp: TsxResponse) -> Response {
    Response {
        line: resp.line,
        headers: resp.headers,
        body: resp.body,
    }
}

/// Drive a single transaction to its conclusion: forward provisionals,
/// apply a latent or immediate CANCEL, and return the final response or
/// error (spec §4.E, §5 cancellation semantics).
async fn drive_transaction(
    tsx: &mut TsxHandle,
    cancel_rx: &mut oneshot::Receiver<()>,
    canceled: &mut bool,
    events: &mpsc::UnboundedSender<DispatchEvent>,
) -> DriveOutcome {
    let mut provisional_received = false;
    let mut cancel_issued = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut *cancel_rx, if !*canceled => {
                *canceled = true;

                if provisional_received && !cancel_issued {
                    cancel_issued = true;
                    if let Err(e) = issue_cancel(tsx).await {
                        log::warn!("failed to send CANCEL: {e}");
                    }
                }
            }

            result = tsx.receive_msg() => {
                match result {
                    Ok(Some(resp)) if resp.line.code.kind() == CodeKind::Provisional => {
                        provisional_received = true;

                        if *canceled && !cancel_issued {
                            cancel_issued = true;
                            if let Err(e) = issue_cancel(tsx).await {
                                log::warn!("failed to send CANCEL: {e}");
                            }
                        }

                        let _ = events.send(DispatchEvent::Provisional(to_response(resp)));
                    }
                    Ok(Some(resp)) => return DriveOutcome::Final(to_response(resp)),
                    Ok(None) => return DriveOutcome::Error(Error::RequestTimedOut),
                    Err(e) => return DriveOutcome::Error(e),
                }
            }
        }
    }
}

/// Send a CANCEL for the in-flight INVITE transaction. Non-INVITE
/// transactions have no wire-level cancel in RFC 3261 (CANCEL only targets
/// INVITE, §9.1); cancellation there just suppresses failover and lets the
/// transaction run its course to a final response or ctrans timeout.
async fn issue_cancel(tsx: &TsxHandle) -> Result<()> {
    let TsxHandle::Invite(inv) = tsx else {
        return Ok(());
    };

    let outgoing = inv.request();
    let cancel_request = build_cancel_request(&outgoing.msg)?;

    let mut target = TargetTransportInfo {
        via_host_port: None,
        transport: Some((outgoing.parts.transport.clone(), outgoing.parts.destination)),
    };

    inv.cancel(cancel_request, &mut target).await
}

fn build_cancel_request(original: &Request) -> Result<Request> {
    let mut headers = Headers::with_capacity(4);

    original.headers.clone_into(&mut headers, Name::FROM)?;
    original.headers.clone_into(&mut headers, Name::TO)?;
    original.headers.clone_into(&mut headers, Name::CALL_ID)?;

    let cseq: CSeq = original.headers.get_named()?;
    headers.insert_named(&CSeq {
        cseq: cseq.cseq,
        method: Method::CANCEL,
    });

    Ok(Request {
        line: RequestLine {
            method: Method::CANCEL,
            uri: original.line.uri.clone(),
        },
        headers,
        body: Bytes::new(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn invite() -> Request {
        let mut headers = Headers::with_capacity(5);
        headers.insert(Name::FROM, "<sip:alice@example.com>;tag=abc");
        headers.insert(Name::TO, "<sip:bob@example.com>");
        headers.insert(Name::CALL_ID, "abc123@example.com");
        headers.insert_named(&CSeq::new(1, Method::INVITE));

        Request {
            line: RequestLine {
                method: Method::INVITE,
                uri: "sip:bob@example.com".parse().unwrap(),
            },
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn cancel_request_carries_from_to_call_id_unchanged() {
        let cancel = build_cancel_request(&invite()).unwrap();

        assert_eq!(cancel.line.method, Method::CANCEL);
        let cseq: CSeq = cancel.headers.get_named().unwrap();
        assert_eq!(cseq.method, Method::CANCEL);
        assert_eq!(cseq.cseq, 1);
    }

    #[test]
    fn cancel_request_reuses_the_original_request_uri() {
        let original = invite();
        let cancel = build_cancel_request(&original).unwrap();
        assert!(original.line.uri.compare(&cancel.line.uri));
    }

    #[test]
    fn cancel_request_fails_without_required_headers() {
        let bare = Request {
            line: RequestLine {
                method: Method::INVITE,
                uri: "sip:bob@example.com".parse().unwrap(),
            },
            headers: Headers::with_capacity(0),
            body: Bytes::new(),
        };

        assert!(build_cancel_request(&bare).is_err());
    }

    #[test]
    fn retriable_errors_are_network_shaped() {
        assert!(is_retriable(&Error::RequestTimedOut));
        assert!(is_retriable(&Error::NetworkError(std::io::Error::other(
            "connection reset"
        ))));
        assert!(!is_retriable(&Error::UnsupportedProtocol));
        assert!(!is_retriable(&Error::NoDestination));
    }

    #[test]
    fn route_params_rejects_sips_scheme() {
        let route: SipUri = "sips:bob@example.com".parse().unwrap();
        assert!(matches!(route_params(&route), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn route_params_extracts_transport_and_maddr() {
        let route: SipUri = "sip:bob@example.com;transport=tcp;maddr=192.0.2.1"
            .parse()
            .unwrap();

        let (_, _, maddr, transport) = route_params(&route).unwrap();
        assert_eq!(transport, Some(TransportKind::Tcp));
        assert_eq!(maddr, Some(Host::IP4([192, 0, 2, 1].into())));
    }

    #[test]
    fn route_params_rejects_unknown_transport() {
        let route: SipUri = "sip:bob@example.com;transport=sctp".parse().unwrap();
        assert!(route_params(&route).is_err());
    }

    #[tokio::test]
    async fn close_all_aborts_registered_dispatch_and_delivers_connection_aborted() {
        let registry = DispatchRegistry::new();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DispatchEvent>();

        let join = tokio::spawn(std::future::pending::<()>());

        let entry = Arc::new(RegisteredDispatch {
            abort: join.abort_handle(),
            events: events_tx,
        });
        registry.register(&entry);

        registry.close_all();

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            DispatchEvent::Final(Err(Error::ConnectionAborted))
        ));

        let joined = join.await;
        assert!(joined.unwrap_err().is_cancelled());

        drop(entry);
    }

    #[tokio::test]
    async fn close_all_ignores_entries_already_gone() {
        let registry = DispatchRegistry::new();
        let (events_tx, _events_rx) = mpsc::unbounded_channel::<DispatchEvent>();

        let join = tokio::spawn(std::future::pending::<()>());
        let entry = Arc::new(RegisteredDispatch {
            abort: join.abort_handle(),
            events: events_tx,
        });
        registry.register(&entry);
        drop(entry);
        join.abort();
        let _ = join.await;

        // No panic, no stale entry left to upgrade.
        registry.close_all();
        assert!(registry.entries.lock().is_empty());
    }
}
