//! Test doubles shared by the worker tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use shoal_wire::WireMessage;

use crate::transport::Transport;

/// In-memory transport: inbound messages are fed by the test, outbound
/// messages are captured for inspection.
pub(crate) struct QueueTransport {
    inbound: Mutex<VecDeque<WireMessage>>,
    sent: Mutex<Vec<WireMessage>>,
}

impl QueueTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn push_inbound(&self, message: WireMessage) {
        self.inbound.lock().unwrap().push_back(message);
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<WireMessage> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl Transport for QueueTransport {
    fn enqueue_outgoing(&self, message: WireMessage) {
        self.sent.lock().unwrap().push(message);
    }

    fn take_next_matching(
        &self,
        predicate: &dyn Fn(&WireMessage) -> bool,
    ) -> Option<WireMessage> {
        let mut inbound = self.inbound.lock().unwrap();
        let index = inbound.iter().position(|m| predicate(m))?;
        inbound.remove(index)
    }

    fn pending_inbound(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }
}
