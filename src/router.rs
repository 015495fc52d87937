use std::net::SocketAddr;

/// The router half of the watchdog: the one operation driven as
/// destination health changes.
///
/// The watchdog never inspects the router's state; it only pushes weight
/// updates through this seam and remembers which ones were accepted.
pub trait Router: Send + Sync {
    /// Applies a new effective weight to `addr`.
    ///
    /// A non-positive weight advertises the destination as unusable; a
    /// negative weight asks for its removal. Returns false if the router
    /// refused the update, in which case the watchdog retries on the next
    /// tick that crosses its hysteresis gate.
    fn change_dst(&self, addr: SocketAddr, weight: f64) -> bool;
}
