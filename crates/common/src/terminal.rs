//! Terminal-stream consumer collaborator

/// The byte stream on the host side of the port (a line discipline, a pty,
/// a socket...)
///
/// [`deliver`](TerminalSink::deliver) is called from the transfer completion
/// context and must not block. Every other method is only called from the
/// deferred-wake worker or the control plane.
pub trait TerminalSink: Send + Sync {
    /// Bytes the consumer can currently take
    fn sink_capacity(&self) -> usize;

    /// Hand received bytes to the consumer
    ///
    /// Never called with more than the last reported capacity.
    fn deliver(&self, bytes: &[u8]);

    /// Take up to `max` bytes awaiting transmission
    fn pull_pending(&self, max: usize) -> Vec<u8>;

    /// Output room has become available again
    fn notify_space_available(&self);

    /// Carrier was lost or the device went away
    fn hangup(&self) {}
}
