use sip_types::StatusCode;

/// Per-request failure-counter state machine used to flag a request that is
/// looping between the same few responses without making progress.
///
/// Not wired into [`super::Dispatch`] automatically: callers that retry a
/// request across independent [`Dispatch::send`](super::Dispatch::send) calls
/// (e.g. after following a redirect) drive one `LoopGuard` across those calls
/// and consult [`LoopGuard::detect`] themselves — the dispatcher's own
/// per-candidate failover already has its own termination condition (queue
/// exhaustion) and doesn't need looping detection internally.
#[derive(Debug, Default)]
pub struct LoopGuard {
    failc: u32,
    last_scode: Option<StatusCode>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the initial state (`failc == 0`, no remembered status code).
    pub fn reset(&mut self) {
        self.failc = 0;
        self.last_scode = None;
    }

    /// Feed the next response's status code. Returns `true` once the request
    /// should be considered looping.
    pub fn detect(&mut self, scode: StatusCode) -> bool {
        let looped = match scode.kind() {
            sip_types::CodeKind::Success => {
                self.failc = 0;
                false
            }
            sip_types::CodeKind::Redirection => {
                self.failc += 1;
                self.failc >= 16
            }
            _ if matches!(scode.into_u16(), 401 | 407 | 491) => {
                self.failc += 1;
                self.failc >= 16
            }
            sip_types::CodeKind::RequestFailure
            | sip_types::CodeKind::ServerFailure
            | sip_types::CodeKind::GlobalFailure => {
                self.failc += 1;
                self.last_scode == Some(scode) || self.failc >= 16
            }
            _ => false,
        };

        self.last_scode = Some(scode);

        looped
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn code(n: u16) -> StatusCode {
        StatusCode::from(n)
    }

    #[test]
    fn reset_state() {
        let guard = LoopGuard::new();
        assert_eq!(guard.failc, 0);
        assert_eq!(guard.last_scode, None);
    }

    #[test]
    fn success_keeps_failc_zero() {
        let mut guard = LoopGuard::new();
        for _ in 0..5 {
            assert!(!guard.detect(code(200)));
        }
        assert_eq!(guard.failc, 0);
    }

    #[test]
    fn repeated_redirect_eventually_loops() {
        let mut guard = LoopGuard::new();
        for _ in 0..15 {
            assert!(!guard.detect(code(302)));
        }
        assert!(guard.detect(code(302)));
    }

    #[test]
    fn auth_challenges_loop_without_repeat() {
        let mut guard = LoopGuard::new();
        // Alternating 401/407 still counts toward failc, no repeat-code needed.
        for i in 0..15 {
            let c = if i % 2 == 0 { 401 } else { 407 };
            assert!(!guard.detect(code(c)));
        }
        assert!(guard.detect(code(491)));
    }

    #[test]
    fn repeated_5xx_loops_immediately_on_repeat() {
        let mut guard = LoopGuard::new();
        assert!(!guard.detect(code(503)));
        assert!(guard.detect(code(503)));
    }

    #[test]
    fn alternating_5xx_does_not_loop_until_16() {
        let mut guard = LoopGuard::new();
        for i in 0..15 {
            let c = if i % 2 == 0 { 500 } else { 502 };
            assert!(!guard.detect(code(c)));
        }
        assert!(guard.detect(code(504)));
    }
}
