use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use chanmux_router::{
    ChannelGroups, ChannelRouter, ConnectionEvents, ConnectionHandle,
};
use chanmux_wire::{CommError, WireConfig, WireFraming};

use crate::clients::ConnectedClients;
use crate::error::Result;

/// Per-server policy for incoming connections.
pub trait ServerHandler<M>: Send + Sync + 'static {
    /// Channel-group layout for each new client connection.
    fn channel_groups(&self) -> ChannelGroups {
        ChannelGroups::single()
    }

    /// Event sink for a new client connection.
    fn events(&self) -> Arc<dyn ConnectionEvents<M>>;

    /// A client connected. Its router is not running yet, so state machines
    /// registered here see the client's first frames.
    fn client_connected(&self, _handle: &ConnectionHandle<M>) {}
}

struct ServerState<M: Send + 'static> {
    handler: Arc<dyn ServerHandler<M>>,
    clients: ConnectedClients<M>,
    routers: Mutex<HashMap<String, ChannelRouter<M>>>,
    running: AtomicBool,
    next_client: AtomicU64,
    config: WireConfig,
}

impl<M: Send + 'static> ServerState<M> {
    fn routers(&self) -> MutexGuard<'_, HashMap<String, ChannelRouter<M>>> {
        self.routers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach_client(&self, id: &str) {
        self.clients.remove(id);
        if self.routers().remove(id).is_some() {
            debug!(client = %id, "client detached");
        }
    }
}

impl<M> ServerState<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn accept_client(state: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let n = state.next_client.fetch_add(1, Ordering::Relaxed);
        let id = format!("client-{n}@{peer}");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(client = %id, %err, "set_nodelay failed");
        }
        let framing = match WireFraming::new(&id, stream, state.config.clone()) {
            Ok(framing) => framing,
            Err(err) => {
                warn!(client = %id, %err, "rejecting connection");
                return;
            }
        };
        let events: Arc<dyn ConnectionEvents<M>> = Arc::new(ClientEvents {
            inner: state.handler.events(),
            state: Arc::downgrade(state),
        });
        let router = match ChannelRouter::new(framing, events, &state.handler.channel_groups()) {
            Ok(router) => router,
            Err(err) => {
                warn!(client = %id, %err, "bad channel-group configuration");
                return;
            }
        };
        let handle = router.handle();
        state.clients.insert(handle.clone());
        state.routers().insert(id.clone(), router);
        info!(client = %id, "client connected");
        state.handler.client_connected(&handle);
        if let Some(router) = state.routers().get(&id) {
            router.start();
        }
    }
}

/// Forwards connection events to the handler's sink and drops the client
/// from the registry when its connection ends.
struct ClientEvents<M: Send + 'static> {
    inner: Arc<dyn ConnectionEvents<M>>,
    state: Weak<ServerState<M>>,
}

impl<M: Send + 'static> ClientEvents<M> {
    fn detach(&self, id: &str) {
        if let Some(state) = self.state.upgrade() {
            state.detach_client(id);
        }
    }
}

impl<M: Send + 'static> ConnectionEvents<M> for ClientEvents<M> {
    fn object_message(&self, handle: &ConnectionHandle<M>, channel: u8, message: M) {
        self.inner.object_message(handle, channel, message);
    }

    fn data_message(&self, handle: &ConnectionHandle<M>, channel: u8, data: Bytes) {
        self.inner.data_message(handle, channel, data);
    }

    fn channel_freed(&self, handle: &ConnectionHandle<M>, channel: u8) {
        self.inner.channel_freed(handle, channel);
    }

    fn disconnected(&self, handle: &ConnectionHandle<M>, expected: bool) {
        self.inner.disconnected(handle, expected);
        self.detach(handle.id());
    }

    fn error(&self, handle: &ConnectionHandle<M>, error: CommError) {
        self.inner.error(handle, error);
        self.detach(handle.id());
    }
}

/// Accepts TCP connections and runs a [`ChannelRouter`] for each.
///
/// The accept loop runs on its own thread from [`bind`](TcpServer::bind)
/// until [`stop`](TcpServer::stop). Clients disappear from the registry when
/// their connection ends, whichever side closes it.
pub struct TcpServer<M: Send + 'static> {
    state: Arc<ServerState<M>>,
    local_addr: SocketAddr,
    accept_worker: Mutex<Option<JoinHandle<()>>>,
}

impl<M> TcpServer<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Bind and start accepting.
    pub fn bind(
        addr: impl ToSocketAddrs,
        handler: Arc<dyn ServerHandler<M>>,
        config: WireConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ServerState {
            handler,
            clients: ConnectedClients::new(),
            routers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            next_client: AtomicU64::new(0),
            config,
        });

        let accept_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name(format!("accept@{local_addr}"))
            .spawn(move || loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if !accept_state.running.load(Ordering::SeqCst) {
                            break;
                        }
                        ServerState::accept_client(&accept_state, stream, peer);
                    }
                    Err(err) => {
                        if !accept_state.running.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(%err, "accept failed");
                    }
                }
            })?;

        info!(%local_addr, "server listening");
        Ok(Self {
            state,
            local_addr,
            accept_worker: Mutex::new(Some(worker)),
        })
    }
}

impl<M: Send + 'static> TcpServer<M> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of currently connected clients.
    pub fn clients(&self) -> &ConnectedClients<M> {
        &self.state.clients
    }

    /// Stop accepting and disconnect every client. Idempotent; blocks until
    /// all connections have wound down.
    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!(addr = %self.local_addr, "server stopping");
            // Wake the accept loop so it observes the flag.
            let _ = TcpStream::connect(self.local_addr);
            let drained: Vec<ChannelRouter<M>> = {
                let mut routers = self.state.routers();
                routers.drain().map(|(_, router)| router).collect()
            };
            for router in &drained {
                router.disconnect();
            }
            for router in &drained {
                router.join();
            }
        }
        let worker = self
            .accept_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl<M: Send + 'static> Drop for TcpServer<M> {
    fn drop(&mut self) {
        self.stop();
    }
}
