//! State enumeration for listener endpoints.

/// State of a listener endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UdpServerState {
    /// Endpoint is not bound.
    #[default]
    Unbound,
    /// Endpoint is binding to an address.
    Binding,
    /// Endpoint is bound and receiving.
    Bound,
    /// Endpoint is closed.
    Closed,
}

impl std::fmt::Display for UdpServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UdpServerState::Unbound => write!(f, "Unbound"),
            UdpServerState::Binding => write!(f, "Binding"),
            UdpServerState::Bound => write!(f, "Bound"),
            UdpServerState::Closed => write!(f, "Closed"),
        }
    }
}
