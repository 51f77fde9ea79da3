//! The queue interface the protocol workers see.
//!
//! Discovery and directory sync are handed a transport at construction
//! instead of reaching for a process-wide instance; in production that is
//! the [`Multiplexer`](crate::multiplexer::Multiplexer), in tests a plain
//! queue pair.

use shoal_wire::WireMessage;

/// Non-blocking access to the transport's inbound and outbound queues.
pub trait Transport: Send + Sync {
    /// Append a ready-made frame to the outbound queue. Returns
    /// immediately; ordering is FIFO and the queue is unbounded (message
    /// volume here is small and bursty).
    fn enqueue_outgoing(&self, message: WireMessage);

    /// Remove and return the first queued inbound message satisfying
    /// `predicate`, if any. Callers poll on their own tick; there is no
    /// wakeup signal.
    fn take_next_matching(&self, predicate: &dyn Fn(&WireMessage) -> bool)
        -> Option<WireMessage>;

    /// Size of the inbound queue.
    fn pending_inbound(&self) -> usize;
}
