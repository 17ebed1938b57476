//! WebSocket push channel.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use super::{ChannelKind, DeliveryChannel, Inbound};
use crate::client::cache::RemoteUpdate;
use crate::client::remote::HttpNotificationApi;
use crate::notification::{ClientMessage, ServerMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Server-pushed updates over a WebSocket.
pub struct PushChannel {
    url: Url,
    stream: Option<WsStream>,
}

impl PushChannel {
    pub fn new(url: Url) -> Self {
        Self { url, stream: None }
    }

    pub fn for_api(api: &HttpNotificationApi) -> Result<Self> {
        Ok(Self::new(api.push_url()?))
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::channel("push channel not connected"))?;
        let text = serde_json::to_string(&message)?;
        if let Err(e) = stream.send(Message::text(text)).await {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Routes a decoded frame by kind.
fn classify(frame: ServerMessage) -> Inbound {
    match frame {
        ServerMessage::Heartbeat { .. } => Inbound::Heartbeat,
        ServerMessage::Error { code, message } => Inbound::ServerError { code, message },
        other => match RemoteUpdate::from_server(other) {
            Some(update) => Inbound::Update(update),
            None => Inbound::Heartbeat,
        },
    }
}

#[async_trait]
impl DeliveryChannel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(mut old) = self.stream.take() {
            let _ = old.close(None).await;
        }
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        debug!(host = self.url.host_str().unwrap_or_default(), "Push channel open");
        self.stream = Some(stream);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Inbound>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::channel("push channel not connected"))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(text.as_str()) {
                    Ok(frame) => return Ok(Some(classify(frame))),
                    Err(e) => debug!(error = %e, "Ignoring malformed server frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Push channel closed by server");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(other)) => trace!(?other, "Ignoring non-text frame"),
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn request_snapshot(&mut self) -> Result<()> {
        self.send(ClientMessage::Refresh).await
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.send(ClientMessage::Heartbeat).await
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
