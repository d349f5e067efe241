//! Failover JSON-RPC subscription client.
//!
//! A [`FailoverClient`] is a cheap handle onto one background task (the
//! driver) which owns the active connection, the subscription table and the
//! in-flight request map. Callers talk to the driver over a command channel;
//! state changes are published on a `watch` channel.
//!
//! ```text
//! Idle ──connect──▶ ConnectingPrimary ──open──▶ OpenPrimary
//!                        │ fail                    │ lost
//!                        ▼                         ▼
//!                   ConnectingBackup ◀─────────────┘
//!                        │ open          │ fail / no backup
//!                        ▼               ▼
//!                    OpenBackup ──lost──▶ Closed
//! ```
//!
//! Subscriptions survive every transition except `disconnect()`; each new
//! connection starts by re-registering all of them.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use chainwatch_core::error::TransportError;
use chainwatch_core::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use chainwatch_core::transport::{HealthStatus, RpcTransport};

use crate::config::ClientConfig;
use crate::connector::{Connection, Connector, FrameSink, TungsteniteConnector};
use crate::message::Inbound;
use crate::state::{ConnectionState, EndpointRole};
use crate::subscriptions::{Delivery, Evicted, SubscriptionHandle, SubscriptionTable};

type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

/// Command sent from callers to the driver task.
enum Command {
    Connect {
        tx: Reply<EndpointRole>,
    },
    Subscribe {
        key: String,
        tx: Reply<(SubscriptionHandle, mpsc::UnboundedReceiver<Value>)>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        tx: Reply<()>,
    },
    Request {
        method: String,
        params: Vec<Value>,
        tx: Reply<JsonRpcResponse>,
    },
    Disconnect {
        tx: oneshot::Sender<()>,
    },
    Shutdown,
}

/// What an outstanding request id is waiting for.
enum Pending {
    Subscribe(SubscriptionHandle),
    Unsubscribe,
    Request(Reply<JsonRpcResponse>),
}

/// Outcome of handling one command or frame.
enum Flow {
    Continue,
    /// The active connection failed.
    Lost(TransportError),
    /// `disconnect()` ran; abandon the connection without failing over.
    Disconnected,
    /// Handle dropped; stop the driver.
    Shutdown,
}

/// A live subscription: its handle plus the stream of notification payloads.
///
/// The stream ends when the subscription is removed, replaced by a newer
/// registration of the same key, rejected by the endpoint, or the client is
/// disconnected. Dropping it releases the registration: the entry is evicted
/// at its next notification or before the next replay, whichever comes first.
pub struct Subscription {
    handle: SubscriptionHandle,
    key: String,
    events: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next notification payload.
    pub async fn next_event(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    /// Take a notification that has already arrived, if any.
    pub fn try_next_event(&mut self) -> Option<Value> {
        self.events.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Subscription client with a primary and an optional backup endpoint.
///
/// Must be created inside a Tokio runtime. Dropping the client stops its
/// background task.
pub struct FailoverClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl FailoverClient {
    /// Client using the tokio-tungstenite WebSocket connector.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let url = config.primary_url.clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            config,
            connector,
            cmd_rx,
            state_tx,
            subscriptions: SubscriptionTable::new(),
            pending: HashMap::new(),
            connect_waiters: Vec::new(),
            next_request_id: 1,
        };
        tokio::spawn(driver.run());

        Self {
            url,
            cmd_tx,
            state_rx,
        }
    }

    /// Open the primary endpoint (falling back to the backup).
    ///
    /// Idempotent: returns immediately when a connection is already open and
    /// joins the in-progress attempt when one is connecting. Resolves with
    /// the role of the endpoint that opened, or `ConnectionFailure` once the
    /// client has settled in `Closed`.
    pub async fn connect(&self) -> Result<EndpointRole, TransportError> {
        self.ask(|tx| Command::Connect { tx }).await
    }

    /// Register interest in `key` (e.g. a transaction signature).
    ///
    /// Accepted while connecting or open; the registration is replayed on
    /// every later connection. Fails with `NotConnected` when idle or closed.
    pub async fn subscribe(&self, key: impl Into<String>) -> Result<Subscription, TransportError> {
        let key = key.into();
        let cmd_key = key.clone();
        let (handle, events) = self
            .ask(move |tx| Command::Subscribe { key: cmd_key, tx })
            .await?;
        Ok(Subscription {
            handle,
            key,
            events,
        })
    }

    /// Callback-style [`FailoverClient::subscribe`]: `callback` runs on a
    /// spawned task for every notification until the subscription ends.
    pub async fn subscribe_with<F>(
        &self,
        key: impl Into<String>,
        mut callback: F,
    ) -> Result<SubscriptionHandle, TransportError>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let mut subscription = self.subscribe(key).await?;
        let handle = subscription.handle();
        tokio::spawn(async move {
            while let Some(event) = subscription.next_event().await {
                callback(event);
            }
        });
        Ok(handle)
    }

    /// Remove a subscription so it is never replayed again.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        self.ask(move |tx| Command::Unsubscribe { handle, tx }).await
    }

    /// One-off JSON-RPC call over the open connection.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let method = method.into();
        let resp = self
            .ask(move |tx| Command::Request { method, params, tx })
            .await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Close the active connection and drop every subscription.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { tx }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn ask<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| TransportError::Other("client task stopped".into()))?;
        rx.await
            .map_err(|_| TransportError::Other("client task stopped".into()))?
    }
}

impl Drop for FailoverClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

#[async_trait]
impl RpcTransport for FailoverClient {
    /// The request id is reassigned by the driver; the caller's id is not
    /// echoed back.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let JsonRpcRequest { method, params, .. } = req;
        self.ask(move |tx| Command::Request { method, params, tx })
            .await
    }

    fn health(&self) -> HealthStatus {
        self.state().health()
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ─── Driver task ──────────────────────────────────────────────────────────────

struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: SubscriptionTable,
    pending: HashMap<u64, Pending>,
    connect_waiters: Vec<Reply<EndpointRole>>,
    next_request_id: u64,
}

enum Opening {
    Opened(Result<Connection, TransportError>),
    Command(Option<Command>),
}

enum SessionEvent {
    Command(Option<Command>),
    Frame(Option<Result<String, TransportError>>),
}

impl Driver {
    async fn run(mut self) {
        loop {
            let flow = match self.current() {
                ConnectionState::ConnectingPrimary => self.establish(EndpointRole::Primary).await,
                ConnectionState::ConnectingBackup => self.establish(EndpointRole::Backup).await,
                // sessions run inside `establish`; only offline states wait here
                _ => match self.cmd_rx.recv().await {
                    Some(cmd) => self.handle_command(cmd, None).await,
                    None => Flow::Shutdown,
                },
            };
            if let Flow::Shutdown = flow {
                self.close();
                tracing::debug!("failover client driver stopped");
                return;
            }
        }
    }

    /// Open the endpoint for `role`, then run the session on it. Commands are
    /// serviced while the open is in flight.
    async fn establish(&mut self, role: EndpointRole) -> Flow {
        let url = match role {
            EndpointRole::Primary => self.config.primary_url.clone(),
            EndpointRole::Backup => match self.config.backup_url.clone() {
                Some(url) => url,
                None => {
                    let url = self.config.primary_url.clone();
                    self.settle_closed(&url, "primary failed and no backup endpoint is configured");
                    return Flow::Continue;
                }
            },
        };

        tracing::info!(url = %url, %role, "connecting");
        let connector = Arc::clone(&self.connector);
        let open = connector.open(&url);
        tokio::pin!(open);

        let opened = loop {
            let event = tokio::select! {
                res = &mut open => Opening::Opened(res),
                cmd = self.cmd_rx.recv() => Opening::Command(cmd),
            };
            match event {
                Opening::Opened(res) => break res,
                Opening::Command(None) => return Flow::Shutdown,
                Opening::Command(Some(cmd)) => match self.handle_command(cmd, None).await {
                    Flow::Continue | Flow::Lost(_) => {}
                    other => return other,
                },
            }
        };

        match opened {
            Ok(conn) => self.session(role, &url, conn).await,
            Err(e) => {
                tracing::warn!(url = %url, %role, error = %e, "open failed");
                self.fail_over(role, &url, &e);
                Flow::Continue
            }
        }
    }

    async fn session(&mut self, role: EndpointRole, url: &str, conn: Connection) -> Flow {
        let Connection {
            mut sink,
            mut stream,
        } = conn;

        self.set_state(match role {
            EndpointRole::Primary => ConnectionState::OpenPrimary,
            EndpointRole::Backup => ConnectionState::OpenBackup,
        });

        let abandoned = self.subscriptions.prune_abandoned();
        if abandoned > 0 {
            tracing::debug!(count = abandoned, "dropped abandoned subscriptions before replay");
        }
        // Re-register every subscription before any other outbound frame
        if !self.subscriptions.is_empty() {
            tracing::info!(url = %url, count = self.subscriptions.len(), "re-registering subscriptions");
        }
        for (handle, key) in self.subscriptions.replay_order() {
            if let Err(e) = self.send_subscribe(&mut sink, handle, key).await {
                self.connection_lost(role, url, e);
                return Flow::Continue;
            }
        }
        self.resolve_waiters(role);

        loop {
            let event = tokio::select! {
                cmd = self.cmd_rx.recv() => SessionEvent::Command(cmd),
                frame = stream.next() => SessionEvent::Frame(frame),
            };
            let flow = match event {
                SessionEvent::Command(None) => Flow::Shutdown,
                SessionEvent::Command(Some(cmd)) => self.handle_command(cmd, Some(&mut sink)).await,
                SessionEvent::Frame(Some(Ok(text))) => self.dispatch(&text, &mut sink).await,
                SessionEvent::Frame(Some(Err(e))) => Flow::Lost(e),
                SessionEvent::Frame(None) => {
                    Flow::Lost(TransportError::connection(url, "connection closed"))
                }
            };
            match flow {
                Flow::Continue => {}
                Flow::Lost(e) => {
                    self.connection_lost(role, url, e);
                    return Flow::Continue;
                }
                other => {
                    let _ = sink.close().await;
                    return other;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command, sink: Option<&mut FrameSink>) -> Flow {
        match cmd {
            Command::Connect { tx } => {
                let state = self.current();
                if let Some(role) = state.open_role() {
                    let _ = tx.send(Ok(role));
                } else {
                    self.connect_waiters.push(tx);
                    if state.is_offline() {
                        self.set_state(ConnectionState::ConnectingPrimary);
                    }
                }
                Flow::Continue
            }

            Command::Subscribe { key, tx } => {
                if self.current().is_offline() {
                    let _ = tx.send(Err(TransportError::NotConnected));
                    return Flow::Continue;
                }
                let (handle, rx, evicted) = self.subscriptions.register(key.clone());
                match &evicted {
                    Some(old) => tracing::debug!(%handle, replaced = %old.handle, key = %key, "subscription re-registered"),
                    None => tracing::debug!(%handle, key = %key, "subscription registered"),
                }

                let mut flow = Flow::Continue;
                if let Some(sink) = sink {
                    // a replaced registration that the endpoint confirmed must be released
                    if let Some(Evicted { remote: Some(remote), .. }) = evicted {
                        if let Err(e) = self.send_unsubscribe(sink, remote).await {
                            flow = Flow::Lost(e);
                        }
                    }
                    if let Flow::Continue = flow {
                        if let Err(e) = self.send_subscribe(sink, handle, key).await {
                            flow = Flow::Lost(e);
                        }
                    }
                }
                // kept for replay even if the send failed
                let _ = tx.send(Ok((handle, rx)));
                flow
            }

            Command::Unsubscribe { handle, tx } => {
                // removed even when offline so it is never replayed
                let removed = self.subscriptions.remove(handle);
                if self.current().is_offline() {
                    if removed.is_some() {
                        tracing::debug!(%handle, "subscription removed while offline");
                    }
                    let _ = tx.send(Err(TransportError::NotConnected));
                    return Flow::Continue;
                }
                let Some((_, remote)) = removed else {
                    let _ = tx.send(Err(TransportError::UnknownSubscription(handle.0)));
                    return Flow::Continue;
                };
                tracing::debug!(%handle, "subscription removed");

                let mut flow = Flow::Continue;
                if let (Some(sink), Some(remote)) = (sink, remote) {
                    if let Err(e) = self.send_unsubscribe(sink, remote).await {
                        flow = Flow::Lost(e);
                    }
                }
                let _ = tx.send(Ok(()));
                flow
            }

            Command::Request { method, params, tx } => {
                let Some(sink) = sink else {
                    let _ = tx.send(Err(TransportError::NotConnected));
                    return Flow::Continue;
                };
                // on failure `tx` is failed by `connection_lost`
                match self
                    .send_request(sink, &method, params, Pending::Request(tx))
                    .await
                {
                    Ok(()) => Flow::Continue,
                    Err(e) => Flow::Lost(e),
                }
            }

            Command::Disconnect { tx } => {
                self.close();
                let _ = tx.send(());
                Flow::Disconnected
            }

            Command::Shutdown => Flow::Shutdown,
        }
    }

    async fn dispatch(&mut self, text: &str, sink: &mut FrameSink) -> Flow {
        match Inbound::parse(text) {
            Inbound::Notification {
                subscription,
                result,
            } => {
                match self.subscriptions.dispatch(&subscription, result) {
                    Delivery::Delivered => Flow::Continue,
                    Delivery::Unknown => {
                        tracing::debug!(%subscription, "dropping notification for unknown subscription");
                        Flow::Continue
                    }
                    Delivery::Abandoned(Evicted { handle, remote }) => {
                        tracing::debug!(%handle, "releasing abandoned subscription");
                        match remote {
                            Some(remote) => match self.send_unsubscribe(sink, remote).await {
                                Ok(()) => Flow::Continue,
                                Err(e) => Flow::Lost(e),
                            },
                            None => Flow::Continue,
                        }
                    }
                }
            }
            Inbound::Response(resp) => self.handle_response(resp, sink).await,
            Inbound::ParseError(e) => {
                let err = TransportError::MalformedMessage(e);
                tracing::warn!(error = %err, "dropping unparsable frame");
                Flow::Continue
            }
            Inbound::Unrecognized(value) => {
                tracing::debug!(frame = %value, "dropping unrecognized frame");
                Flow::Continue
            }
        }
    }

    async fn handle_response(&mut self, resp: JsonRpcResponse, sink: &mut FrameSink) -> Flow {
        let Some(pending) = resp
            .id
            .as_number()
            .and_then(|id| self.pending.remove(&id))
        else {
            tracing::debug!(id = %resp.id, "response for unknown request");
            return Flow::Continue;
        };

        match pending {
            Pending::Request(tx) => {
                let _ = tx.send(Ok(resp));
                Flow::Continue
            }
            Pending::Unsubscribe => {
                if let Some(err) = resp.error {
                    tracing::debug!(code = err.code, message = %err.message, "deregistration rejected");
                }
                Flow::Continue
            }
            Pending::Subscribe(handle) => match resp.into_result() {
                Err(err) => {
                    tracing::warn!(%handle, code = err.code, message = %err.message, "subscription rejected by endpoint");
                    self.subscriptions.remove(handle);
                    Flow::Continue
                }
                Ok(value) => {
                    let Some(remote) = RpcId::from_value(&value) else {
                        tracing::warn!(%handle, result = %value, "subscription confirmed without an id");
                        return Flow::Continue;
                    };
                    if self.subscriptions.confirm(handle, remote.clone()) {
                        tracing::debug!(%handle, %remote, "subscription confirmed");
                        return Flow::Continue;
                    }
                    // unsubscribed while the registration was in flight
                    match self.send_unsubscribe(sink, remote).await {
                        Ok(()) => Flow::Continue,
                        Err(e) => Flow::Lost(e),
                    }
                }
            },
        }
    }

    async fn send_subscribe(
        &mut self,
        sink: &mut FrameSink,
        handle: SubscriptionHandle,
        key: String,
    ) -> Result<(), TransportError> {
        let method = self.config.subscribe_method.clone();
        let params = vec![
            Value::String(key),
            serde_json::json!({ "commitment": self.config.commitment }),
        ];
        self.send_request(sink, &method, params, Pending::Subscribe(handle))
            .await
    }

    async fn send_unsubscribe(
        &mut self,
        sink: &mut FrameSink,
        remote: RpcId,
    ) -> Result<(), TransportError> {
        let method = self.config.unsubscribe_method.clone();
        self.send_request(sink, &method, vec![remote.to_value()], Pending::Unsubscribe)
            .await
    }

    /// Register `pending` under a fresh id, then send the frame.
    async fn send_request(
        &mut self,
        sink: &mut FrameSink,
        method: &str,
        params: Vec<Value>,
        pending: Pending,
    ) -> Result<(), TransportError> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let frame = JsonRpcRequest::new(id, method, params).to_frame()?;
        self.pending.insert(id, pending);
        sink.send(frame).await
    }

    fn connection_lost(&mut self, role: EndpointRole, url: &str, err: TransportError) {
        tracing::warn!(url = %url, %role, error = %err, "connection lost");
        let reason = err.to_string();
        for (_, pending) in self.pending.drain() {
            if let Pending::Request(tx) = pending {
                let _ = tx.send(Err(TransportError::connection(url, &reason)));
            }
        }
        self.subscriptions.reset_remote_ids();
        self.fail_over(role, url, &err);
    }

    /// Primary failures move on to the backup; backup failures are terminal.
    fn fail_over(&mut self, role: EndpointRole, url: &str, err: &TransportError) {
        match role {
            EndpointRole::Primary => self.set_state(ConnectionState::ConnectingBackup),
            EndpointRole::Backup => self.settle_closed(url, err),
        }
    }

    fn settle_closed(&mut self, url: &str, reason: impl std::fmt::Display) {
        tracing::error!(url = %url, reason = %reason, "no endpoint available, client closed");
        self.set_state(ConnectionState::Closed);
        let reason = reason.to_string();
        for tx in self.connect_waiters.drain(..) {
            let _ = tx.send(Err(TransportError::connection(url, &reason)));
        }
    }

    /// Explicit teardown: the only path that clears subscriptions.
    fn close(&mut self) {
        self.subscriptions.clear();
        for (_, pending) in self.pending.drain() {
            if let Pending::Request(tx) = pending {
                let _ = tx.send(Err(TransportError::NotConnected));
            }
        }
        for tx in self.connect_waiters.drain(..) {
            let _ = tx.send(Err(TransportError::NotConnected));
        }
        self.set_state(ConnectionState::Closed);
    }

    fn resolve_waiters(&mut self, role: EndpointRole) {
        for tx in self.connect_waiters.drain(..) {
            let _ = tx.send(Ok(role));
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "connection state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockServer, Plan};
    use serde_json::json;
    use std::time::Duration;

    const PRIMARY: &str = "wss://primary.test";
    const BACKUP: &str = "wss://backup.test";

    fn client(connector: Arc<MockConnector>) -> FailoverClient {
        FailoverClient::with_connector(ClientConfig::new(PRIMARY).with_backup(BACKUP), connector)
    }

    async fn next_event(sub: &mut Subscription) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("timed out waiting for an event")
    }

    async fn wait_for(client: &FailoverClient, want: ConnectionState) {
        let mut rx = client.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("driver stopped");
    }

    /// Read one registration frame for `key` and confirm it as `remote`.
    async fn confirm(server: &mut MockServer, key: &str, remote: u64) {
        let frame = server.next_frame().await;
        assert_eq!(frame["method"], "signatureSubscribe");
        assert_eq!(frame["params"][0], key);
        server.reply(&frame["id"], json!(remote));
    }

    /// Issue `getSlot` and assert it is the next frame the server sees.
    async fn assert_next_frame_is_get_slot(client: &Arc<FailoverClient>, server: &mut MockServer) {
        let c = Arc::clone(client);
        let call = tokio::spawn(async move { c.request("getSlot", vec![]).await });
        let frame = server.next_frame().await;
        assert_eq!(frame["method"], "getSlot");
        server.reply(&frame["id"], json!(311));
        assert_eq!(call.await.unwrap().unwrap(), json!(311));
    }

    #[tokio::test]
    async fn subscription_survives_failover() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        assert_eq!(client.state(), ConnectionState::OpenPrimary);
        let mut primary = servers.next().await;
        assert_eq!(primary.url, PRIMARY);

        let mut sub = client.subscribe("sigA").await.unwrap();
        let frame = primary.next_frame().await;
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["params"][1]["commitment"], "confirmed");
        primary.reply(&frame["id"], json!(100));
        primary.notify(100, json!({ "value": { "err": null }, "n": 1 }));
        assert_eq!(next_event(&mut sub).await.unwrap()["n"], 1);

        primary.drop_connection();
        let mut backup = servers.next().await;
        assert_eq!(backup.url, BACKUP);
        confirm(&mut backup, "sigA", 7).await;
        backup.notify(7, json!({ "n": 2 }));

        assert_eq!(next_event(&mut sub).await.unwrap()["n"], 2);
        assert_eq!(client.state(), ConnectionState::OpenBackup);
        assert_eq!(client.health(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn unsubscribed_key_is_not_replayed() {
        let (connector, mut servers) = MockConnector::new();
        let client = Arc::new(client(connector));
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let a = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 1).await;
        let _b = client.subscribe("sigB").await.unwrap();
        confirm(&mut primary, "sigB", 2).await;

        client.unsubscribe(a.handle()).await.unwrap();
        let frame = primary.next_frame().await;
        assert_eq!(frame["method"], "signatureUnsubscribe");
        assert_eq!(frame["params"], json!([1]));

        primary.drop_connection();
        let mut backup = servers.next().await;
        confirm(&mut backup, "sigB", 9).await;
        assert_next_frame_is_get_slot(&client, &mut backup).await;
    }

    #[tokio::test]
    async fn disconnect_clears_subscriptions() {
        let (connector, mut servers) = MockConnector::new();
        let client = Arc::new(client(connector));
        client.connect().await.unwrap();
        let mut primary = servers.next().await;
        let mut sub = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 5).await;

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(next_event(&mut sub).await.is_none());
        assert!(matches!(
            client.subscribe("sigB").await,
            Err(TransportError::NotConnected)
        ));

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        let mut again = servers.next().await;
        assert_eq!(again.url, PRIMARY);
        assert_next_frame_is_get_slot(&client, &mut again).await;
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;
        let mut sub = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 3).await;

        primary.push("{definitely not json");
        primary.push(r#"{"hello":"world"}"#);
        primary.push(r#"{"jsonrpc":"2.0","id":4242,"result":1}"#);
        primary.notify(999, json!({ "stray": true }));
        primary.notify(3, json!({ "ok": true }));

        assert_eq!(next_event(&mut sub).await.unwrap(), json!({ "ok": true }));
        assert!(sub.try_next_event().is_none());
        assert_eq!(client.state(), ConnectionState::OpenPrimary);
    }

    #[tokio::test]
    async fn subscription_made_while_connecting_goes_to_backup() {
        let (connector, mut servers) = MockConnector::new();
        let (release, hold) = oneshot::channel();
        connector.plan(PRIMARY, Plan::Hold(hold));
        let client = Arc::new(client(connector));

        let c = Arc::clone(&client);
        let connecting = tokio::spawn(async move { c.connect().await });
        wait_for(&client, ConnectionState::ConnectingPrimary).await;

        let mut sub = client.subscribe("sigP").await.unwrap();
        release.send(false).unwrap();

        assert_eq!(connecting.await.unwrap().unwrap(), EndpointRole::Backup);
        assert_eq!(client.state(), ConnectionState::OpenBackup);
        let mut backup = servers.next().await;
        assert_eq!(backup.url, BACKUP);
        confirm(&mut backup, "sigP", 12).await;
        backup.notify(12, json!({ "value": { "err": null } }));
        assert!(next_event(&mut sub).await.is_some());
    }

    #[tokio::test]
    async fn no_backup_settles_closed() {
        let (connector, _servers) = MockConnector::new();
        connector.plan(PRIMARY, Plan::Refuse);
        let client = FailoverClient::with_connector(ClientConfig::new(PRIMARY), connector);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailure { .. }));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.subscribe("sigA").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            client.request("getSlot", vec![]).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn backup_loss_closes_and_connect_replays() {
        let (connector, mut servers) = MockConnector::new();
        connector.plan(PRIMARY, Plan::Refuse);
        let client = client(connector);

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Backup);
        let mut backup = servers.next().await;
        let mut sub = client.subscribe("sigA").await.unwrap();
        confirm(&mut backup, "sigA", 1).await;

        backup.fail("reset by peer");
        wait_for(&client, ConnectionState::Closed).await;

        // failure does not clear subscriptions; the next connect replays them
        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        let mut primary = servers.next().await;
        confirm(&mut primary, "sigA", 2).await;
        primary.notify(2, json!("landed"));
        assert_eq!(next_event(&mut sub).await.unwrap(), json!("landed"));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        assert!(client.subscribe("early").await.is_err());

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        let _primary = servers.next().await;
        assert!(servers.none_pending());
    }

    #[tokio::test]
    async fn resubscribing_a_key_replaces_the_old_registration() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let mut first = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 40).await;
        let mut second = client.subscribe("sigA").await.unwrap();
        assert_ne!(first.handle(), second.handle());

        let release = primary.next_frame().await;
        assert_eq!(release["method"], "signatureUnsubscribe");
        assert_eq!(release["params"], json!([40]));
        confirm(&mut primary, "sigA", 41).await;

        primary.notify(40, json!("stale"));
        primary.notify(41, json!("fresh"));
        assert_eq!(next_event(&mut second).await.unwrap(), json!("fresh"));
        assert!(next_event(&mut first).await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_errors() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        assert!(matches!(
            client.unsubscribe(SubscriptionHandle(1)).await,
            Err(TransportError::NotConnected)
        ));

        client.connect().await.unwrap();
        let _primary = servers.next().await;
        assert!(matches!(
            client.unsubscribe(SubscriptionHandle(77)).await,
            Err(TransportError::UnknownSubscription(77))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_while_closed_is_not_replayed() {
        let (connector, mut servers) = MockConnector::new();
        connector.plan(PRIMARY, Plan::Refuse);
        let client = Arc::new(client(connector));

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Backup);
        let mut backup = servers.next().await;
        let mut a = client.subscribe("sigA").await.unwrap();
        confirm(&mut backup, "sigA", 1).await;
        let _b = client.subscribe("sigB").await.unwrap();
        confirm(&mut backup, "sigB", 2).await;

        backup.fail("reset by peer");
        wait_for(&client, ConnectionState::Closed).await;

        assert!(matches!(
            client.unsubscribe(a.handle()).await,
            Err(TransportError::NotConnected)
        ));
        assert!(next_event(&mut a).await.is_none());

        assert_eq!(client.connect().await.unwrap(), EndpointRole::Primary);
        let mut primary = servers.next().await;
        confirm(&mut primary, "sigB", 3).await;
        assert_next_frame_is_get_slot(&client, &mut primary).await;
    }

    #[tokio::test]
    async fn dropped_subscription_is_released() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let sub = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 30).await;
        drop(sub);

        primary.notify(30, json!({ "slot": 9 }));
        let release = primary.next_frame().await;
        assert_eq!(release["method"], "signatureUnsubscribe");
        assert_eq!(release["params"], json!([30]));
    }

    #[tokio::test]
    async fn dropped_subscription_is_not_replayed() {
        let (connector, mut servers) = MockConnector::new();
        let client = Arc::new(client(connector));
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let _kept = client.subscribe("sigA").await.unwrap();
        confirm(&mut primary, "sigA", 1).await;
        let gone = client.subscribe("sigB").await.unwrap();
        confirm(&mut primary, "sigB", 2).await;
        drop(gone);

        primary.drop_connection();
        let mut backup = servers.next().await;
        confirm(&mut backup, "sigA", 5).await;
        assert_next_frame_is_get_slot(&client, &mut backup).await;
    }

    #[tokio::test]
    async fn unsubscribe_before_confirmation_releases_remote_id() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let sub = client.subscribe("sigA").await.unwrap();
        let frame = primary.next_frame().await;
        // removed locally before the endpoint answers; nothing to deregister yet
        client.unsubscribe(sub.handle()).await.unwrap();
        primary.reply(&frame["id"], json!(55));

        let release = primary.next_frame().await;
        assert_eq!(release["method"], "signatureUnsubscribe");
        assert_eq!(release["params"], json!([55]));
    }

    #[tokio::test]
    async fn rejected_subscription_ends_its_stream() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let mut sub = client.subscribe("not-a-signature").await.unwrap();
        let id = primary.next_frame().await["id"].clone();
        primary.push(
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": "Invalid param: not a signature" }
            })
            .to_string(),
        );
        assert!(next_event(&mut sub).await.is_none());
        assert!(matches!(
            client.unsubscribe(sub.handle()).await,
            Err(TransportError::UnknownSubscription(_))
        ));
    }

    #[tokio::test]
    async fn callback_subscription_receives_events() {
        let (connector, mut servers) = MockConnector::new();
        let client = client(connector);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe_with("sigA", move |event| {
                let _ = tx.send(event);
            })
            .await
            .unwrap();
        confirm(&mut primary, "sigA", 8).await;
        primary.notify(8, json!({ "slot": 1 }));

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, Some(json!({ "slot": 1 })));
    }

    #[tokio::test]
    async fn in_flight_request_fails_on_connection_loss() {
        let (connector, mut servers) = MockConnector::new();
        let client = Arc::new(client(connector));
        client.connect().await.unwrap();
        let mut primary = servers.next().await;

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.request("getLatestBlockhash", vec![]).await });
        let frame = primary.next_frame().await;
        assert_eq!(frame["method"], "getLatestBlockhash");
        primary.drop_connection();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailure { .. }));
        let _backup = servers.next().await;
        wait_for(&client, ConnectionState::OpenBackup).await;
    }

    #[tokio::test]
    async fn rpc_transport_round_trip() {
        let (connector, mut servers) = MockConnector::new();
        let client = Arc::new(client(connector));
        assert_eq!(client.health(), HealthStatus::Unknown);
        client.connect().await.unwrap();
        let mut primary = servers.next().await;
        assert_eq!(client.url(), PRIMARY);
        assert_eq!(client.health(), HealthStatus::Healthy);

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.call::<u64>(99, "getSlot", vec![]).await });
        let frame = primary.next_frame().await;
        primary.reply(&frame["id"], json!(123_456));
        assert_eq!(call.await.unwrap().unwrap(), 123_456);
    }
}
