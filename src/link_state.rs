use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Lifecycle phase of the transport, derived from the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Stopped,
    Advertising,
    Connected,
    Subscribed,
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkInner {
    conn_handle: Option<u16>,
    subscribed: bool,
    /// Attribute handle of the TX characteristic, cached at registration.
    tx_handle: u16,
}

/// The single live connection record. Writers (GAP events, stack callback
/// context) and readers (notify producers, dispatcher) run on different
/// tasks, so every access takes one short critical section.
pub(crate) struct LinkState {
    inner: Mutex<CriticalSectionRawMutex, RefCell<LinkInner>>,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(LinkInner::default())),
        }
    }

    pub(crate) fn set_tx_handle(&self, handle: u16) {
        self.inner.lock(|cell| cell.borrow_mut().tx_handle = handle);
    }

    pub(crate) fn tx_handle(&self) -> u16 {
        self.inner.lock(|cell| cell.borrow().tx_handle)
    }

    pub(crate) fn on_connect(&self, conn: u16) {
        self.inner.lock(|cell| {
            let mut link = cell.borrow_mut();
            link.conn_handle = Some(conn);
            link.subscribed = false;
        });
    }

    /// Clear the link. Returns whether a link was actually present, so a
    /// racing duplicate disconnect stays a harmless no-op.
    pub(crate) fn on_disconnect(&self) -> bool {
        self.inner.lock(|cell| {
            let mut link = cell.borrow_mut();
            let had_link = link.conn_handle.is_some();
            link.conn_handle = None;
            link.subscribed = false;
            had_link
        })
    }

    pub(crate) fn set_subscribed(&self, enabled: bool) {
        self.inner.lock(|cell| cell.borrow_mut().subscribed = enabled);
    }

    /// Forget everything, including the cached TX handle. Used when the
    /// channel starts a fresh session or shuts down.
    pub(crate) fn clear(&self) {
        self.inner.lock(|cell| *cell.borrow_mut() = LinkInner::default());
    }

    pub(crate) fn conn_handle(&self) -> Option<u16> {
        self.inner.lock(|cell| cell.borrow().conn_handle)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn_handle().is_some()
    }

    /// Connection and TX handles as one atomic read, present only while a
    /// central is connected with notifications enabled.
    pub(crate) fn notify_target(&self) -> Option<(u16, u16)> {
        self.inner.lock(|cell| {
            let link = cell.borrow();
            match link.conn_handle {
                Some(conn) if link.subscribed => Some((conn, link.tx_handle)),
                _ => None,
            }
        })
    }

    pub(crate) fn phase(&self, started: bool) -> LinkPhase {
        if !started {
            return LinkPhase::Stopped;
        }
        self.inner.lock(|cell| {
            let link = cell.borrow();
            match (link.conn_handle, link.subscribed) {
                (None, _) => LinkPhase::Advertising,
                (Some(_), false) => LinkPhase::Connected,
                (Some(_), true) => LinkPhase::Subscribed,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_follow_connection_and_subscription() {
        let link = LinkState::new();
        assert_eq!(link.phase(false), LinkPhase::Stopped);
        assert_eq!(link.phase(true), LinkPhase::Advertising);

        link.on_connect(7);
        assert_eq!(link.phase(true), LinkPhase::Connected);
        assert!(link.notify_target().is_none());

        link.set_tx_handle(42);
        link.set_subscribed(true);
        assert_eq!(link.phase(true), LinkPhase::Subscribed);
        assert_eq!(link.notify_target(), Some((7, 42)));
    }

    #[test]
    fn duplicate_disconnect_is_idempotent() {
        let link = LinkState::new();
        link.on_connect(3);
        assert!(link.on_disconnect());
        assert!(!link.on_disconnect());
        assert_eq!(link.phase(true), LinkPhase::Advertising);
    }

    #[test]
    fn connect_resets_subscription() {
        let link = LinkState::new();
        link.on_connect(1);
        link.set_subscribed(true);
        link.on_connect(2);
        assert!(link.notify_target().is_none());
    }
}
