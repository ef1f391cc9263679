use crate::api::events::{Frame, OutboundEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Write side of the session's single socket connection.
#[derive(Clone)]
pub struct SocketHandle {
    outbound: UnboundedSender<OutboundEvent>,
}

impl SocketHandle {
    /// A handle not bound to any connection; embedders and tests drain the
    /// returned receiver themselves.
    pub fn detached() -> (SocketHandle, UnboundedReceiver<OutboundEvent>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (SocketHandle { outbound }, rx)
    }

    pub fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).is_err() {
            warn!("socket writer gone; dropping outbound event");
        }
    }
}

pub fn ws_url(base_url: &str, token: &str) -> Result<Url, url::ParseError> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base_url}")
    };
    Url::parse(&format!(
        "{}/socket?token={}",
        ws_base.trim_end_matches('/'),
        token
    ))
}

/// Establishes the session's socket channel. One logical connection for the
/// session lifetime: dropped connections are reopened after a fixed delay,
/// with `Connected`/`Disconnected` markers pushed into the event stream so
/// the sync engine can reconcile the gap (the server does not replay missed
/// events). The task ends when the event receiver is dropped.
pub fn connect(base_url: &str, token: &str) -> (SocketHandle, UnboundedReceiver<ServerEvent>) {
    let (handle, mut outbound_rx) = SocketHandle::detached();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let base_url = base_url.to_string();
    let token = token.to_string();

    tokio::spawn(async move {
        loop {
            let url = match ws_url(&base_url, &token) {
                Ok(url) => url,
                Err(err) => {
                    warn!("invalid socket url: {err}");
                    return;
                }
            };
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!("socket connected");
                    if event_tx.send(ServerEvent::Connected).is_err() {
                        return;
                    }
                    let (mut write, mut read) = stream.split();
                    loop {
                        tokio::select! {
                            incoming = read.next() => match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<Frame>(&text) {
                                        Ok(frame) => {
                                            if let Some(event) = ServerEvent::decode(&frame) {
                                                if event_tx.send(event).is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                        Err(err) => warn!("undecodable socket frame: {err}"),
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    warn!("socket read error: {err}");
                                    break;
                                }
                            },
                            event = outbound_rx.recv() => match event {
                                Some(event) => {
                                    let frame = event.to_frame();
                                    let text = match serde_json::to_string(&frame) {
                                        Ok(text) => text,
                                        Err(err) => {
                                            warn!("unencodable outbound frame: {err}");
                                            continue;
                                        }
                                    };
                                    if let Err(err) = write.send(WsMessage::Text(text)).await {
                                        warn!("socket write failed: {err}");
                                        break;
                                    }
                                }
                                None => return,
                            },
                        }
                    }
                    if event_tx.send(ServerEvent::Disconnected).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!("socket connect failed: {err}");
                    if event_tx.is_closed() {
                        return;
                    }
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });

    (handle, event_rx)
}
