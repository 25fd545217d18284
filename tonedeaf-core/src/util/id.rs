use std::fmt::Display;

use crossbeam::atomic::AtomicCell;

static NEXT_SOCKET: AtomicCell<u64> = AtomicCell::new(1);

/// Identifies a socket connected to this process.
///
/// Only unique within the process that created it, so it never travels
/// between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl SocketId {
    pub fn new() -> Self {
        Self(NEXT_SOCKET.fetch_add(1))
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
