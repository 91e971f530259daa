//! Direct TCP links.
//!
//! The initiator binds an ephemeral port and offers its address through the
//! relay; the responder dials it and answers. Frames travel as
//! newline-delimited JSON (serialized JSON never contains a raw newline).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quintet_shared::constants::CONNECT_TIMEOUT_SECS;
use quintet_shared::types::Role;

use crate::transport::{Connector, DirectSignal, Link, LinkError, LinkEvent};

/// Settings for [`TcpConnector`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Interface the initiator listens on.
    pub bind_host: String,
    /// Host written into offers; must be reachable by the other participant.
    pub advertise_host: String,
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

impl TcpConnector {
    pub fn new(bind_host: impl Into<String>, advertise_host: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
            advertise_host: advertise_host.into(),
            ..Self::default()
        }
    }
}

impl Connector for TcpConnector {
    fn open(&self, role: Role, events: mpsc::UnboundedSender<LinkEvent>) -> Box<dyn Link> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut link = TcpLink {
            role,
            settings: self.clone(),
            events,
            out_tx,
            out_rx: Some(out_rx),
            ready: Arc::new(AtomicBool::new(false)),
            task: None,
        };

        if role == Role::Initiator {
            if let Some(out_rx) = link.out_rx.take() {
                link.task = Some(tokio::spawn(run_initiator(
                    link.settings.clone(),
                    link.events.clone(),
                    out_rx,
                    link.ready.clone(),
                )));
            }
        }

        Box::new(link)
    }
}

struct TcpLink {
    role: Role,
    settings: TcpConnector,
    events: mpsc::UnboundedSender<LinkEvent>,
    out_tx: mpsc::UnboundedSender<String>,
    /// Handed to the IO task once it starts.
    out_rx: Option<mpsc::UnboundedReceiver<String>>,
    ready: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Link for TcpLink {
    fn signal(&mut self, signal: Value) {
        match (self.role, DirectSignal::from_value(&signal)) {
            (Role::Responder, Some(DirectSignal::Offer { addr })) => {
                let Some(out_rx) = self.out_rx.take() else {
                    debug!(addr = %addr, "Ignoring repeated offer on responder link");
                    return;
                };
                self.task = Some(tokio::spawn(run_responder(
                    addr,
                    self.settings.connect_timeout,
                    self.events.clone(),
                    out_rx,
                    self.ready.clone(),
                )));
            }
            (Role::Initiator, Some(DirectSignal::Answer)) => {
                debug!("Responder acknowledged offer");
            }
            (role, _) => {
                warn!(?role, signal = %signal, "Unexpected signal for TCP link");
            }
        }
    }

    fn send(&self, frame: &str) -> Result<(), LinkError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(LinkError::NotReady);
        }
        self.out_tx
            .send(frame.to_string())
            .map_err(|_| LinkError::Closed)
    }

    fn close(&mut self) {
        self.ready.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_initiator(
    settings: TcpConnector,
    events: mpsc::UnboundedSender<LinkEvent>,
    out_rx: mpsc::UnboundedReceiver<String>,
    ready: Arc<AtomicBool>,
) {
    let listener = match TcpListener::bind((settings.bind_host.as_str(), 0)).await {
        Ok(l) => l,
        Err(e) => {
            let _ = events.send(LinkEvent::Closed(Some(format!("bind failed: {e}"))));
            return;
        }
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            let _ = events.send(LinkEvent::Closed(Some(format!("no local address: {e}"))));
            return;
        }
    };

    let addr = format!("{}:{}", settings.advertise_host, port);
    debug!(addr = %addr, "Offering direct link");
    let _ = events.send(LinkEvent::Signal(DirectSignal::Offer { addr }.to_value()));

    let stream = match tokio::time::timeout(settings.connect_timeout, listener.accept()).await {
        Ok(Ok((stream, remote))) => {
            debug!(remote = %remote, "Responder connected");
            stream
        }
        Ok(Err(e)) => {
            let _ = events.send(LinkEvent::Closed(Some(format!("accept failed: {e}"))));
            return;
        }
        Err(_) => {
            let _ = events.send(LinkEvent::Closed(Some("timed out waiting for responder".into())));
            return;
        }
    };
    drop(listener);

    run_stream(stream, events, out_rx, ready).await;
}

async fn run_responder(
    addr: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
    out_rx: mpsc::UnboundedReceiver<String>,
    ready: Arc<AtomicBool>,
) {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = events.send(LinkEvent::Closed(Some(format!("connect to {addr} failed: {e}"))));
            return;
        }
        Err(_) => {
            let _ = events.send(LinkEvent::Closed(Some(format!("connect to {addr} timed out"))));
            return;
        }
    };

    let _ = events.send(LinkEvent::Signal(DirectSignal::Answer.to_value()));
    run_stream(stream, events, out_rx, ready).await;
}

async fn run_stream(
    stream: TcpStream,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    ready: Arc<AtomicBool>,
) {
    let _ = stream.set_nodelay(true);
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    ready.store(true, Ordering::Release);
    let _ = events.send(LinkEvent::Open);

    let reason = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(frame)) => {
                        if frame.is_empty() {
                            continue;
                        }
                        let _ = events.send(LinkEvent::Data(frame));
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(format!("read failed: {e}")),
                }
            }
            frame = out_rx.recv() => {
                let Some(mut frame) = frame else {
                    break None;
                };
                frame.push('\n');
                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                    break Some(format!("write failed: {e}"));
                }
            }
        }
    };

    ready.store(false, Ordering::Release);
    let _ = events.send(LinkEvent::Closed(reason));
}
