use crate::Endpoint;

/// Transports this dispatcher knows how to resolve and attempt, in the
/// fixed preference order `UDP < TCP < TLS` used by [`first_supported`]
/// and [`next_supported`].
///
/// The spec's transport set also lists `WS`/`WSS`, but no websocket
/// transport exists in this crate (no factory, no listener) so they are
/// left out rather than faked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
}

impl TransportKind {
    pub(crate) const ORDER: [TransportKind; 3] =
        [TransportKind::Udp, TransportKind::Tcp, TransportKind::Tls];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
        }
    }

    pub(crate) fn default_port(self) -> u16 {
        match self {
            TransportKind::Udp | TransportKind::Tcp => 5060,
            TransportKind::Tls => 5061,
        }
    }

    /// Decode a `transport=` URI parameter value, case-insensitive.
    pub(crate) fn decode(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("udp") {
            Some(TransportKind::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Some(TransportKind::Tcp)
        } else if s.eq_ignore_ascii_case("tls") {
            Some(TransportKind::Tls)
        } else {
            None
        }
    }

    /// NAPTR `services` field this transport is advertised under.
    ///
    /// RFC 3403 services are case-insensitive, so the comparison is done on
    /// an uppercased copy rather than the raw bytes.
    pub(crate) fn from_naptr_services(services: &[u8]) -> Option<Self> {
        match services.to_ascii_uppercase().as_slice() {
            b"SIP+D2U" => Some(TransportKind::Udp),
            b"SIP+D2T" => Some(TransportKind::Tcp),
            b"SIPS+D2T" => Some(TransportKind::Tls),
            _ => None,
        }
    }

    /// SRV service identifier, or `None` for transports with no SRV
    /// service defined (the sentinel `"???"` from the spec).
    pub(crate) fn srv_service_id(self) -> Option<&'static str> {
        match self {
            TransportKind::Udp => Some("_sip._udp"),
            TransportKind::Tcp => Some("_sip._tcp"),
            TransportKind::Tls => Some("_sips._tcp"),
        }
    }

    pub(crate) fn srv_name(self, host: &str) -> Option<String> {
        self.srv_service_id().map(|prefix| format!("{prefix}.{host}"))
    }
}

/// Returns the stack's default transport if supported, otherwise the
/// lowest-indexed supported transport.
pub(crate) fn first_supported(endpoint: &Endpoint) -> Option<TransportKind> {
    TransportKind::ORDER
        .into_iter()
        .find(|t| endpoint.transports().supports_transport(t.as_str()))
}

/// Strictly higher index than `current`, supported by the stack.
#[allow(dead_code)]
pub(crate) fn next_supported(
    endpoint: &Endpoint,
    current: TransportKind,
) -> Option<TransportKind> {
    TransportKind::ORDER
        .into_iter()
        .filter(|&t| t > current)
        .find(|t| endpoint.transports().supports_transport(t.as_str()))
}

/// Strictly lower index than `current` (or, if `current` is `None`, starts
/// from the top of the order), skipping transports with no SRV service id.
pub(crate) fn next_srv_candidate(
    endpoint: &Endpoint,
    current: Option<TransportKind>,
) -> Option<TransportKind> {
    let upper = current
        .map(|t| TransportKind::ORDER.iter().position(|&o| o == t).unwrap())
        .unwrap_or(TransportKind::ORDER.len());

    TransportKind::ORDER[..upper]
        .iter()
        .rev()
        .copied()
        .find(|t| t.srv_service_id().is_some() && endpoint.transports().supports_transport(t.as_str()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_is_case_insensitive() {
        assert_eq!(TransportKind::decode("udp"), Some(TransportKind::Udp));
        assert_eq!(TransportKind::decode("Tcp"), Some(TransportKind::Tcp));
        assert_eq!(TransportKind::decode("TLS"), Some(TransportKind::Tls));
        assert_eq!(TransportKind::decode("sctp"), None);
    }

    #[test]
    fn default_ports_match_rfc_3261() {
        assert_eq!(TransportKind::Udp.default_port(), 5060);
        assert_eq!(TransportKind::Tcp.default_port(), 5060);
        assert_eq!(TransportKind::Tls.default_port(), 5061);
    }

    #[test]
    fn naptr_services_map_to_the_right_transport() {
        assert_eq!(
            TransportKind::from_naptr_services(b"SIP+D2U"),
            Some(TransportKind::Udp)
        );
        assert_eq!(
            TransportKind::from_naptr_services(b"SIP+D2T"),
            Some(TransportKind::Tcp)
        );
        assert_eq!(
            TransportKind::from_naptr_services(b"SIPS+D2T"),
            Some(TransportKind::Tls)
        );
        assert_eq!(TransportKind::from_naptr_services(b"SIP+D2W"), None);
    }

    #[test]
    fn naptr_services_match_is_case_insensitive() {
        assert_eq!(
            TransportKind::from_naptr_services(b"sip+d2u"),
            Some(TransportKind::Udp)
        );
        assert_eq!(
            TransportKind::from_naptr_services(b"Sip+D2T"),
            Some(TransportKind::Tcp)
        );
        assert_eq!(
            TransportKind::from_naptr_services(b"SIPs+d2T"),
            Some(TransportKind::Tls)
        );
    }

    #[test]
    fn srv_names_are_prefixed_per_transport() {
        assert_eq!(
            TransportKind::Udp.srv_name("example.com"),
            Some("_sip._udp.example.com".to_string())
        );
        assert_eq!(
            TransportKind::Tls.srv_name("example.com"),
            Some("_sips._tcp.example.com".to_string())
        );
    }

    #[test]
    fn order_is_udp_then_tcp_then_tls() {
        assert!(TransportKind::Udp < TransportKind::Tcp);
        assert!(TransportKind::Tcp < TransportKind::Tls);
    }
}
