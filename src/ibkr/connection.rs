//! Process-wide broker connection singleton (§4.A "Connection object").

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::ClientMode;

use super::wrapper::BrokerSocket;

/// Monotonically increasing 32-bit request-id counter (§4.A "Request-id
/// allocation"). Every outbound request that expects a correlated reply
/// draws a fresh id from here.
#[derive(Default)]
pub struct ReqIdAllocator {
    next: AtomicI32,
}

impl ReqIdAllocator {
    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_floor(&self, floor: i32) {
        self.next.fetch_max(floor, Ordering::SeqCst);
    }
}

type ReconnectCallback = Box<dyn Fn() + Send + Sync>;

/// A process-wide singleton wrapping the broker socket. `client_id` must be
/// distinct across co-resident processes; overlapping ids cause the broker
/// to evict the older session, which is why `mode` exists — so operators
/// can partition client ids between a REST bridge and an MCP-only process.
pub struct IbkrConnection<S: BrokerSocket> {
    socket: Arc<S>,
    host: String,
    port: u16,
    client_id: i32,
    mode: ClientMode,
    connected: AtomicBool,
    req_ids: ReqIdAllocator,
    reconnect_callbacks: Mutex<Vec<ReconnectCallback>>,
}

impl<S: BrokerSocket> IbkrConnection<S> {
    pub fn new(socket: Arc<S>, host: impl Into<String>, port: u16, client_id: i32, mode: ClientMode) -> Self {
        Self {
            socket,
            host: host.into(),
            port,
            client_id,
            mode,
            connected: AtomicBool::new(false),
            req_ids: ReqIdAllocator::default(),
            reconnect_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn socket(&self) -> &Arc<S> {
        &self.socket
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn get_next_req_id(&self) -> i32 {
        self.req_ids.next()
    }

    /// Registers a callback to run every time the connection transitions
    /// from disconnected to connected — the subscription registry's
    /// automatic-resubscribe hook attaches here (§4.A "Automatic
    /// resubscribe").
    pub fn on_reconnect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reconnect_callbacks.lock().push(Box::new(callback));
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        let was_connected = self.connected.swap(true, Ordering::SeqCst);
        self.socket.connect(&self.host, self.port, self.client_id).await?;
        info!(host = %self.host, port = self.port, client_id = self.client_id, "ibkr connected");
        if was_connected {
            warn!("connect() called while already marked connected; treating as reconnect");
        }
        for callback in self.reconnect_callbacks.lock().iter() {
            callback();
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.socket.disconnect().await;
        info!("ibkr disconnected");
    }

    /// Marks the connection lost without tearing down the socket binding
    /// itself — called from the broker event loop on a `ConnectionClosed`
    /// callback. Subsequent `connect()` calls drive the reconnect path.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibkr::wrapper::SimulatedBrokerSocket;

    #[test]
    fn req_ids_are_monotonic() {
        let allocator = ReqIdAllocator::default();
        let a = allocator.next();
        let b = allocator.next();
        let c = allocator.next();
        assert!(b > a);
        assert!(c > b);
    }

    #[tokio::test]
    async fn reconnect_callback_fires_on_connect() {
        let socket = Arc::new(SimulatedBrokerSocket::new());
        let conn = IbkrConnection::new(socket, "127.0.0.1", 7497, 1, ClientMode::Rest);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        conn.on_reconnect(move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        conn.connect().await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert!(conn.is_connected());
    }
}
