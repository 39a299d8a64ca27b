/// Terminal outcomes for a forwarded request that did not produce a reply.
/// Exactly one of these (or the reply itself) reaches the originator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// Deadline expired before the peer replied. The label carries the
    /// operation as shown to the caller, e.g. `Operation get_tree` or
    /// `Extension capture_screen`.
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },

    /// The target peer went away while the request was in flight.
    #[error("Peer disconnected")]
    PeerDisconnected,

    /// No peer of the required class was available. Returned before any
    /// correlation entry is created.
    #[error("{0}")]
    NoPeer(String),

    /// The bridge is shutting down.
    #[error("Bridge shutting down")]
    Cancelled,
}

impl ForwardError {
    pub fn timeout(label: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            label: label.into(),
            timeout_ms,
        }
    }

    pub fn no_browser() -> Self {
        Self::NoPeer("No browser connected".into())
    }

    pub fn no_extension(action: &str) -> Self {
        Self::NoPeer(format!("No extension with capability {action}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_shape() {
        let err = ForwardError::timeout("Operation get_tree", 15_000);
        assert_eq!(err.to_string(), "Operation get_tree timed out after 15000ms");

        let err = ForwardError::timeout("Extension capture_screen", 15_000);
        assert_eq!(
            err.to_string(),
            "Extension capture_screen timed out after 15000ms"
        );
    }

    #[test]
    fn no_peer_messages() {
        assert_eq!(ForwardError::no_browser().to_string(), "No browser connected");
        assert_eq!(
            ForwardError::no_extension("capture_screen").to_string(),
            "No extension with capability capture_screen"
        );
    }

    #[test]
    fn disconnect_message() {
        assert_eq!(ForwardError::PeerDisconnected.to_string(), "Peer disconnected");
    }
}
