use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::push::protocol::{Frame, Inbound, Outbound};
use crate::session::SessionCredential;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "polling" | "long-polling" => Ok(TransportKind::Polling),
            other => Err(format!("unknown transport: {other}, expected websocket/polling")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub push_url: String,
    pub transports: Vec<TransportKind>,
    pub request_timeout: Duration,
    pub poll_timeout: Duration,
    http: reqwest::Client,
}

impl TransportSettings {
    pub fn new(
        push_url: impl Into<String>,
        transports: Vec<TransportKind>,
        request_timeout: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            push_url: push_url.into().trim_end_matches('/').to_string(),
            transports,
            request_timeout,
            poll_timeout,
            http: reqwest::Client::new(),
        }
    }
}

/// A live transport: frames written to `outbound` go to the server and
/// decoded server frames arrive on the inbound sender handed to [`open`].
/// The inbound sender is dropped when the transport ends.
pub struct TransportLink {
    pub kind: TransportKind,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl TransportLink {
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Tries each configured transport in order and returns the first that
/// connects.
pub async fn open(
    settings: &TransportSettings,
    credential: &SessionCredential,
    inbound: mpsc::Sender<Inbound>,
) -> Result<TransportLink, ChannelError> {
    let mut failures = Vec::new();

    for kind in &settings.transports {
        let attempt = match kind {
            TransportKind::WebSocket => open_websocket(settings, credential, inbound.clone()).await,
            TransportKind::Polling => open_polling(settings, credential, inbound.clone()).await,
        };

        match attempt {
            Ok(link) => {
                info!(transport = %kind, "push transport connected");
                return Ok(link);
            }
            Err(err) => {
                warn!(transport = %kind, error = %err, "push transport unavailable; trying next");
                failures.push(format!("{kind}: {err}"));
            }
        }
    }

    Err(ChannelError::ConnectFailed(failures.join("; ")))
}

fn websocket_url(push_url: &str, credential: &SessionCredential) -> Result<Url, ChannelError> {
    let base = if let Some(rest) = push_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = push_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        push_url.to_string()
    };

    let mut url = Url::parse(&format!("{base}/ws"))
        .map_err(|err| ChannelError::Transport(format!("invalid push url {push_url}: {err}")))?;
    url.query_pairs_mut().append_pair("token", credential.token());
    Ok(url)
}

async fn open_websocket(
    settings: &TransportSettings,
    credential: &SessionCredential,
    inbound: mpsc::Sender<Inbound>,
) -> Result<TransportLink, ChannelError> {
    let url = websocket_url(&settings.push_url, credential)?;

    let (stream, _response) = tokio::time::timeout(settings.request_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ChannelError::Transport("websocket handshake timed out".to_string()))?
        .map_err(|err| ChannelError::Transport(format!("websocket handshake failed: {err}")))?;

    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => match Inbound::decode(&text) {
                        Ok(frame) => {
                            if inbound.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping malformed push frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("websocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket read failed");
                        break;
                    }
                },
                out = outbound_rx.recv() => match out {
                    Some(frame) => {
                        let text = match frame.encode() {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(error = %err, "failed to encode push frame");
                                continue;
                            }
                        };
                        if let Err(err) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %err, "websocket write failed");
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }

        debug!("websocket transport stopped");
    });

    Ok(TransportLink {
        kind: TransportKind::WebSocket,
        outbound: outbound_tx,
        tasks: vec![task],
    })
}

#[derive(Deserialize)]
struct Handshake {
    sid: String,
}

async fn open_polling(
    settings: &TransportSettings,
    credential: &SessionCredential,
    inbound: mpsc::Sender<Inbound>,
) -> Result<TransportLink, ChannelError> {
    let base = settings.push_url.clone();
    let response = settings
        .http
        .post(format!("{base}/push/handshake"))
        .bearer_auth(credential.token())
        .timeout(settings.request_timeout)
        .send()
        .await
        .map_err(|err| ChannelError::Transport(format!("polling handshake failed: {err}")))?;

    if response.status() != StatusCode::OK {
        return Err(ChannelError::Transport(format!(
            "polling handshake rejected with {}",
            response.status()
        )));
    }

    let Handshake { sid } = response
        .json::<Handshake>()
        .await
        .map_err(|err| ChannelError::Protocol(format!("invalid handshake body: {err}")))?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let poll_client = settings.http.clone();
    let poll_url = format!("{base}/push/poll");
    let poll_sid = sid.clone();
    let poll_timeout = settings.poll_timeout + settings.request_timeout;
    let poller = tokio::spawn(async move {
        loop {
            let frames = match poll_once(&poll_client, &poll_url, &poll_sid, poll_timeout).await {
                Ok(frames) => frames,
                Err(err) => {
                    warn!(error = %err, "long-poll failed");
                    break;
                }
            };

            for frame in frames {
                match Inbound::from_frame(frame) {
                    Ok(inbound_frame) => {
                        if inbound.send(inbound_frame).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed push frame"),
                }
            }
        }

        debug!("polling transport stopped");
    });

    let emit_client = settings.http.clone();
    let emit_url = format!("{base}/push/emit");
    let request_timeout = settings.request_timeout;
    let emitter = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = emit_client
                .post(&emit_url)
                .query(&[("sid", sid.as_str())])
                .timeout(request_timeout)
                .json(&frame.to_frame())
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(err) = result {
                warn!(error = %err, "failed to emit push frame");
            }
        }
    });

    Ok(TransportLink {
        kind: TransportKind::Polling,
        outbound: outbound_tx,
        tasks: vec![poller, emitter],
    })
}

async fn poll_once(
    client: &reqwest::Client,
    url: &str,
    sid: &str,
    timeout: Duration,
) -> Result<Vec<Frame>, ChannelError> {
    let response = client
        .get(url)
        .query(&[("sid", sid)])
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| ChannelError::Transport(err.to_string()))?;

    if !response.status().is_success() {
        return Err(ChannelError::Transport(format!(
            "poll returned {}",
            response.status()
        )));
    }

    response
        .json::<Vec<Frame>>()
        .await
        .map_err(|err| ChannelError::Protocol(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::{TransportKind, TransportSettings, open_websocket, websocket_url};
    use crate::session::SessionCredential;

    #[test]
    fn websocket_url_switches_scheme_and_carries_token() {
        let credential = SessionCredential::new("abc def");
        let url = websocket_url("https://api.example.com", &credential).unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws?token=abc+def");

        let url = websocket_url("http://127.0.0.1:3000", &credential).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn transport_names_parse_case_insensitively() {
        assert_eq!("WebSocket".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert_eq!("long-polling".parse::<TransportKind>().unwrap(), TransportKind::Polling);
    }

    #[tokio::test]
    async fn secure_push_url_reaches_the_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let settings = TransportSettings::new(
            format!("https://{addr}"),
            vec![TransportKind::WebSocket],
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let (inbound, _rx) = mpsc::channel(1);

        let Err(err) = open_websocket(&settings, &SessionCredential::new("abc"), inbound).await else {
            panic!("plain tcp peer must fail the tls handshake");
        };
        let message = err.to_string();
        assert!(message.contains("websocket handshake failed"), "{message}");
        assert!(!message.contains("TLS support not compiled in"), "{message}");
    }
}
