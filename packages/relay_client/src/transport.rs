//! Reconnecting transport
//!
//! Keeps one logical link to the hub alive across drops. Two states while
//! open: `Connected` (a socket is held) and `Reconnecting` (dialing with
//! capped exponential backoff, forever). `close()` is the only way out.
//!
//! Frames sent while reconnecting are lost, not buffered: `send` returns
//! `NotConnected` immediately and the caller decides whether to retry.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_protocol::{DEVICE_ID_PARAM, DeviceId, Envelope, MessageKind, Role, TOKEN_PARAM};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::TransportError;
use crate::backoff::{Backoff, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type Handler = Box<dyn FnMut(Envelope) + Send>;
/// Read half of a live socket and the token cancelled when it is lost.
type Reader = (WsSource, CancellationToken);

/// Where the link currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Reconnecting,
    /// `close()` was called; terminal.
    Closed,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hub WebSocket endpoint, e.g. `ws://localhost:8080/ws`
    pub server_url: String,
    pub device_id: DeviceId,
    /// Pairing token; present for viewers, absent for the agent
    pub token: Option<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single dial attempt
    pub connect_timeout: Duration,
    /// Deadline for a single frame write; expiry counts as a write failure
    pub write_timeout: Duration,
}

impl TransportConfig {
    pub fn new(server_url: impl Into<String>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            token: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// The role the hub will assign this connection.
    pub fn role(&self) -> Role {
        if self.token.is_some() {
            Role::Viewer
        } else {
            Role::Agent
        }
    }

    /// `server_url` with the connection parameters appended.
    pub fn dial_url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.server_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(DEVICE_ID_PARAM, self.device_id.as_str());
            if let Some(token) = &self.token {
                query.append_pair(TOKEN_PARAM, token);
            }
        }
        Ok(url)
    }
}

/// The live socket's write half plus a token cancelled when it is lost.
struct Link {
    sink: WsSink,
    lost: CancellationToken,
}

struct Shared {
    config: TransportConfig,
    url: Url,
    /// Held across a write, so concurrent senders are serialized.
    link: Mutex<Option<Link>>,
    /// Taken by the first `on_message`; the receive task holds the other end.
    handler_slot: Mutex<Option<oneshot::Sender<Handler>>>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

/// Client side of one logical hub connection.
///
/// Cheap to clone; all clones share the link. Dropping the handles does not
/// stop the background task, call [`ReconnectingTransport::close`].
#[derive(Clone)]
pub struct ReconnectingTransport {
    shared: Arc<Shared>,
}

impl ReconnectingTransport {
    /// Dial once and start the background task that redials after any read
    /// or write failure. A failed first dial leaves the transport
    /// `Reconnecting`. Only an unusable URL is an error.
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let url = config.dial_url()?;
        let (state, _) = watch::channel(LinkState::Reconnecting);
        let (handler_tx, handler_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            config,
            url,
            link: Mutex::new(None),
            handler_slot: Mutex::new(Some(handler_tx)),
            state,
            cancel: CancellationToken::new(),
        });

        let first = match shared.dial().await {
            Ok(stream) => {
                info!(device_id = %shared.config.device_id, "connected to hub");
                shared.install(stream).await
            }
            Err(e) => {
                warn!(device_id = %shared.config.device_id, "initial dial failed: {}", e);
                None
            }
        };
        tokio::spawn(shared.clone().run(first, handler_rx));

        Ok(Self { shared })
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Install the message handler. Inbound frames wait in the socket until
    /// one is installed. Handler calls are sequential; undecodable frames
    /// never reach it.
    pub fn on_message<F>(&self, handler: F) -> Result<(), TransportError>
    where
        F: FnMut(Envelope) + Send + 'static,
    {
        if self.shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let Ok(mut slot) = self.shared.handler_slot.try_lock() else {
            return Err(TransportError::HandlerAlreadyInstalled);
        };
        let Some(tx) = slot.take() else {
            return Err(TransportError::HandlerAlreadyInstalled);
        };
        tx.send(Box::new(handler)).map_err(|_| TransportError::Closed)
    }

    /// Send one envelope. Fails fast with `NotConnected` while reconnecting.
    pub async fn send<T: Serialize>(
        &self,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), TransportError> {
        let text = Envelope::with_payload(kind, payload)?.encode()?;
        self.send_raw(text).await
    }

    /// Send a pre-encoded frame verbatim.
    ///
    /// A write that fails or outlives `write_timeout` drops the socket and
    /// moves the transport to `Reconnecting`. `close()` interrupts a write in
    /// progress.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let shared = &self.shared;
        let text: String = text.into();
        let mut guard = tokio::select! {
            _ = shared.cancel.cancelled() => return Err(TransportError::Closed),
            guard = shared.link.lock() => guard,
        };
        let Some(link) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let limit = shared.config.write_timeout;
        let outcome = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            sent = tokio::time::timeout(limit, link.sink.send(Message::Text(text.into()))) => {
                Some(sent)
            }
        };

        let err = match outcome {
            None => {
                // A half-written frame leaves the sink unusable
                guard.take();
                return Err(TransportError::Closed);
            }
            Some(Ok(Ok(()))) => return Ok(()),
            Some(Ok(Err(e))) => TransportError::from(e),
            Some(Err(_)) => TransportError::WriteTimeout(limit),
        };

        warn!(device_id = %shared.config.device_id, "write failed: {}", err);
        if let Some(link) = guard.take() {
            link.lost.cancel();
        }
        drop(guard);
        shared.set_state(LinkState::Reconnecting);
        Err(err)
    }

    /// Stop reconnecting for good and release the socket.
    pub async fn close(&self) {
        let shared = &self.shared;
        // Wakes a blocked writer, which releases the link
        shared.cancel.cancel();
        let link = shared.link.lock().await.take();
        if let Some(mut link) = link {
            match tokio::time::timeout(shared.config.write_timeout, link.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("close handshake failed: {}", e),
                Err(_) => debug!("close handshake timed out"),
            }
        }
        shared.state.send_replace(LinkState::Closed);
        info!(device_id = %shared.config.device_id, "transport closed");
    }
}

impl Shared {
    async fn dial(&self) -> Result<WsStream, TransportError> {
        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::DialTimeout(self.config.connect_timeout)),
        }
    }

    /// Make `stream` the live link. Returns its read half, or `None` if the
    /// transport was closed meanwhile.
    async fn install(&self, stream: WsStream) -> Option<Reader> {
        let (sink, source) = stream.split();
        let lost = self.cancel.child_token();
        {
            let mut link = self.link.lock().await;
            if self.cancel.is_cancelled() {
                return None;
            }
            *link = Some(Link {
                sink,
                lost: lost.clone(),
            });
        }
        self.set_state(LinkState::Connected);
        Some((source, lost))
    }

    /// Forget the live link after a failure.
    async fn drop_link(&self) {
        self.link.lock().await.take();
        self.set_state(LinkState::Reconnecting);
    }

    fn set_state(&self, next: LinkState) {
        self.state.send_if_modified(|current| {
            if *current == LinkState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Background task: owns redialing, and once a handler is installed,
    /// reading.
    async fn run(
        self: Arc<Self>,
        first: Option<Reader>,
        mut handler_rx: oneshot::Receiver<Handler>,
    ) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut next = first;
        let mut handler: Option<Handler> = None;

        loop {
            let (mut source, lost) = match next.take() {
                Some(reader) => reader,
                None => match self.reconnect(&mut backoff).await {
                    Some(reader) => reader,
                    None => break,
                },
            };

            // Without a handler only a write failure or close ends this link
            if handler.is_none() {
                tokio::select! {
                    _ = lost.cancelled() => {}
                    installed = &mut handler_rx => match installed {
                        Ok(installed) => handler = Some(installed),
                        Err(_) => break,
                    },
                }
            }
            if let Some(handler) = handler.as_mut() {
                self.receive(&mut source, &lost, handler).await;
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.drop_link().await;
        }
        debug!(device_id = %self.config.device_id, "background task stopped");
    }

    /// Dispatch inbound frames until the socket fails or the link is lost.
    async fn receive(
        &self,
        source: &mut WsSource,
        lost: &CancellationToken,
        handler: &mut Handler,
    ) {
        loop {
            let msg = tokio::select! {
                _ = lost.cancelled() => return,
                msg = source.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch(handler, Envelope::decode(text.as_str()))
                }
                Some(Ok(Message::Binary(bytes))) => {
                    dispatch(handler, Envelope::decode_bytes(&bytes))
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(device_id = %self.config.device_id, "hub closed the connection");
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(device_id = %self.config.device_id, "read failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Dial until it works or the transport is closed.
    async fn reconnect(&self, backoff: &mut Backoff) -> Option<Reader> {
        loop {
            info!(device_id = %self.config.device_id, "attempting to reconnect");
            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                dialed = self.dial() => dialed,
            };
            match dialed {
                Ok(stream) => {
                    backoff.reset();
                    let reader = self.install(stream).await?;
                    info!(device_id = %self.config.device_id, "reconnected");
                    return Some(reader);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        device_id = %self.config.device_id,
                        "reconnect failed: {}, retrying in {:?}", e, delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn dispatch(handler: &mut Handler, decoded: Result<Envelope, relay_protocol::ProtocolError>) {
    match decoded {
        Ok(envelope) => handler(envelope),
        Err(e) => debug!("dropped inbound frame: {}", e),
    }
}
