//! In-memory connector for driving the failover client in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use chainwatch_core::error::TransportError;

use crate::connector::{Connection, Connector};

const WAIT: Duration = Duration::from_secs(5);

/// How the next `open` of a URL behaves.
pub(crate) enum Plan {
    Accept,
    Refuse,
    /// Block until the test decides: `true` accepts, `false` refuses.
    Hold(oneshot::Receiver<bool>),
}

/// Server side of one accepted connection.
pub(crate) struct MockServer {
    pub url: String,
    outbound: fmpsc::UnboundedReceiver<String>,
    inbound: Option<fmpsc::UnboundedSender<Result<String, TransportError>>>,
}

impl MockServer {
    /// Next frame the client sent, parsed.
    pub async fn next_frame(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    pub fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            tx.unbounded_send(Ok(frame.into())).expect("client stream gone");
        }
    }

    pub fn reply(&self, id: &Value, result: Value) {
        self.push(json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string());
    }

    pub fn notify(&self, subscription: u64, result: Value) {
        self.push(
            json!({
                "jsonrpc": "2.0",
                "method": "signatureNotification",
                "params": { "subscription": subscription, "result": result }
            })
            .to_string(),
        );
    }

    /// End the client's inbound stream, as if the socket closed.
    pub fn drop_connection(&mut self) {
        self.inbound = None;
    }

    /// Deliver a transport error on the client's inbound stream.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.unbounded_send(Err(TransportError::WebSocket(reason.into())));
        }
    }
}

pub(crate) struct MockConnector {
    plans: Mutex<HashMap<String, VecDeque<Plan>>>,
    opened: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockServers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plans: Mutex::new(HashMap::new()),
            opened: tx,
        });
        (connector, MockServers { rx })
    }

    /// Queue a plan for the next open of `url`. Unplanned opens accept.
    pub fn plan(&self, url: &str, plan: Plan) {
        self.plans
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(plan);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Plan::Accept);
        let accept = match plan {
            Plan::Accept => true,
            Plan::Refuse => false,
            Plan::Hold(decision) => decision.await.unwrap_or(false),
        };
        if !accept {
            return Err(TransportError::connection(url, "connection refused"));
        }

        let (out_tx, out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<String, TransportError>>();
        let _ = self.opened.send(MockServer {
            url: url.to_string(),
            outbound: out_rx,
            inbound: Some(in_tx),
        });
        let sink = out_tx.sink_map_err(|e| TransportError::WebSocket(e.to_string()));
        Ok(Connection::new(Box::pin(sink), Box::pin(in_rx)))
    }
}

/// Accepted connections, in open order.
pub(crate) struct MockServers {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockServers {
    pub async fn next(&mut self) -> MockServer {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub fn none_pending(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}
