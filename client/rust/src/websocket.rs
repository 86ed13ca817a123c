/// WebSocket connection for realtime room events
use crate::error::{ClientError, Result};
use crate::models::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Derive the WebSocket endpoint from the HTTP server URL
pub fn websocket_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ClientError::ConfigError(format!("Invalid server URL {}: {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::ConfigError(format!(
                "Unsupported server URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::ConfigError("Cannot set WebSocket scheme".to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}

/// Realtime connection to the server
pub struct RealtimeConnection {
    sender: futures::channel::mpsc::UnboundedSender<Message>,
    receiver: futures::channel::mpsc::UnboundedReceiver<Message>,
}

impl RealtimeConnection {
    /// Connect to the server WebSocket
    pub async fn connect(server_url: &str) -> Result<Self> {
        let url = websocket_url(server_url)?;

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = futures::channel::mpsc::unbounded::<Message>();
        let (tx_in, rx_in) = futures::channel::mpsc::unbounded::<Message>();

        // Spawn task to handle outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    log::debug!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Spawn task to handle incoming messages
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(msg) => {
                        if tx_in.unbounded_send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sender: tx,
            receiver: rx_in,
        })
    }

    /// A connection with no socket behind it. Returns the handle that feeds
    /// inbound frames and the receiver of everything sent.
    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        futures::channel::mpsc::UnboundedSender<Message>,
        futures::channel::mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Message>();
        let (tx_in, rx_in) = futures::channel::mpsc::unbounded::<Message>();
        (
            Self {
                sender: tx,
                receiver: rx_in,
            },
            tx_in,
            rx,
        )
    }

    /// Send a client frame
    pub fn send(&self, event: &ClientEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        self.sender.unbounded_send(Message::text(json))?;
        Ok(())
    }

    /// Bind this connection to a room
    pub fn join_room(&self, room_code: &str, token: &str, display_name: &str) -> Result<()> {
        self.send(&ClientEvent::JoinRoom {
            room_code: room_code.to_string(),
            token: token.to_string(),
            display_name: display_name.to_string(),
        })
    }

    /// Next server event, or `None` once the connection is closed.
    /// Frames that do not parse are skipped.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => log::warn!("Ignoring unrecognized frame: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Close the connection. Nothing is received afterwards.
    pub fn close(&mut self) {
        let _ = self.sender.unbounded_send(Message::Close(None));
        self.sender.close_channel();
        self.receiver.close();
    }
}
