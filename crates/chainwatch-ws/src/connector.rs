//! Transport seam: how the failover client opens a text-frame connection.
//!
//! The driver only sees a [`Connection`], a boxed sink of outbound frames
//! and a boxed stream of inbound frames. [`TungsteniteConnector`] is the
//! production implementation; tests plug in an in-memory one.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use chainwatch_core::error::TransportError;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Inbound half of a connection. An `Err` item or the end of the stream
/// means the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One live transport session.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens connections to endpoint URLs.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open `url`. Failure here triggers failover just like a dropped
    /// connection does.
    async fn open(&self, url: &str) -> Result<Connection, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::connection(url, e))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .with(|frame: String| future::ready(Ok::<_, WsError>(Message::Text(frame.into()))))
            .sink_map_err(|e| TransportError::WebSocket(e.to_string()));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => Some(Err(TransportError::WebSocket(format!(
                    "closed by server: {frame:?}"
                )))),
                // tungstenite answers pings itself; binary frames are not part
                // of the protocol
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
            })
        });

        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}
