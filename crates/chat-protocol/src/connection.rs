//! A framed, event-emitting wrapper around one bidirectional byte stream.
//!
//! [`ChatConnection`] owns its transport through two background tasks: a
//! writer task draining a send queue (so `send` never blocks the caller) and
//! a read task reassembling packets. Inbound response packets resolve
//! outstanding [`send_and_wait`](ChatConnection::send_and_wait) calls in FIFO
//! order; every packet, responses included, is also published as a
//! [`ConnectionEvent`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

use crate::codec::PacketCodec;
use crate::error::ConnectionError;
use crate::events::Listeners;
use crate::packet::{Packet, ResponseCode};

/// Events published by a [`ChatConnection`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The transport is up and the read loop is about to start.
    Opened,
    /// A whole packet arrived (responses included).
    PacketReceived(Packet),
    /// The connection is gone. Carries the fatal error when there was one;
    /// `None` means a plain close or end-of-stream.
    Closed(Option<ConnectionError>),
}

type PendingResponse = oneshot::Sender<Result<ResponseCode, ConnectionError>>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    out_tx: mpsc::UnboundedSender<Bytes>,
    close_tx: watch::Sender<bool>,
    closed: AtomicBool,
    pending: Mutex<VecDeque<PendingResponse>>,
    fatal: Mutex<Option<ConnectionError>>,
    listeners: Listeners<ConnectionEvent>,
    reader: Mutex<Option<FramedRead<BoxedReader, PacketCodec>>>,
}

/// A cheaply cloneable handle to one chat connection.
#[derive(Clone)]
pub struct ChatConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConnection").finish()
    }
}

impl ChatConnection {
    /// Wrap a connected transport.
    ///
    /// The connection does not read until [`start`](Self::start) is called,
    /// so callers can subscribe to events without racing the first packet.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            out_tx,
            close_tx,
            closed: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            fatal: Mutex::new(None),
            listeners: Listeners::new(),
            reader: Mutex::new(Some(FramedRead::new(
                Box::new(read_half) as BoxedReader,
                PacketCodec,
            ))),
        });
        tokio::spawn(write_loop(
            Arc::clone(&inner),
            Box::new(write_half) as BoxedWriter,
            out_rx,
            close_rx,
        ));
        ChatConnection { inner }
    }

    /// Emit [`ConnectionEvent::Opened`] and begin reading from the transport.
    ///
    /// Calling `start` more than once is a no-op.
    pub fn start(&self) {
        let reader = self
            .inner
            .reader
            .lock()
            .expect("connection reader slot poisoned")
            .take();
        let Some(reader) = reader else { return };
        self.inner.listeners.emit(&ConnectionEvent::Opened);
        let close_rx = self.inner.close_tx.subscribe();
        tokio::spawn(read_loop(Arc::clone(&self.inner), reader, close_rx));
    }

    /// The event stream for this connection.
    pub fn events(&self) -> &Listeners<ConnectionEvent> {
        &self.inner.listeners
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue a packet for transmission without waiting for a response.
    ///
    /// The write itself happens on the writer task; a transport failure there
    /// tears the connection down and surfaces through
    /// [`ConnectionEvent::Closed`].
    pub fn send(&self, packet: &Packet) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let bytes = packet.serialize()?;
        self.inner
            .out_tx
            .send(bytes)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Send a packet and wait for the next response packet from the peer.
    ///
    /// Responses are correlated first-in first-out with outstanding calls; a
    /// close or a fatal stream error fails every waiter.
    pub async fn send_and_wait(&self, packet: &Packet) -> Result<ResponseCode, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending queue poisoned")
            .push_back(tx);
        self.send(packet)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.close_reason()),
        }
    }

    /// Ask the transport to close.
    ///
    /// Idempotent. This only initiates teardown; the single
    /// [`ConnectionEvent::Closed`] fires once the read loop winds down.
    pub fn close(&self) {
        let _ = self.inner.close_tx.send(true);
    }

    fn close_reason(&self) -> ConnectionError {
        self.inner
            .fatal
            .lock()
            .expect("fatal slot poisoned")
            .clone()
            .unwrap_or(ConnectionError::Closed)
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut frames: FramedRead<BoxedReader, PacketCodec>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            res = close_rx.wait_for(|closed| *closed) => {
                let _ = res;
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(packet)) => handle_packet(&inner, packet),
                Some(Err(err)) => {
                    record_fatal(&inner, err);
                    break;
                }
                None => break,
            },
        }
    }
    shutdown(&inner);
}

fn handle_packet(inner: &Inner, packet: Packet) {
    trace!(packet = ?packet, "packet received");
    if let Packet::Response(code) = &packet {
        let waiter = inner
            .pending
            .lock()
            .expect("pending queue poisoned")
            .pop_front();
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(*code));
            }
            // Nobody asked: still delivered as an ordinary event below.
            None => debug!(code = ?code, "response with no outstanding request"),
        }
    }
    inner.listeners.emit(&ConnectionEvent::PacketReceived(packet));
}

async fn write_loop(
    inner: Arc<Inner>,
    mut writer: BoxedWriter,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        if *close_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            item = out_rx.recv() => match item {
                Some(bytes) => {
                    if let Err(err) = write_frame(&mut writer, &bytes).await {
                        record_fatal(&inner, ConnectionError::Network(err.to_string()));
                        let _ = inner.close_tx.send(true);
                        break;
                    }
                }
                None => break,
            },
        }
    }
    // Flush whatever was queued before the close request, then shut down.
    while let Ok(bytes) = out_rx.try_recv() {
        if write_frame(&mut writer, &bytes).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &Bytes) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

fn record_fatal(inner: &Inner, err: ConnectionError) {
    let mut fatal = inner.fatal.lock().expect("fatal slot poisoned");
    match (&*fatal, &err) {
        // A decode error outranks a previously recorded transport error.
        (Some(ConnectionError::Network(_)), ConnectionError::Wire(_)) => *fatal = Some(err),
        (None, _) => *fatal = Some(err),
        _ => {}
    }
}

fn shutdown(inner: &Inner) {
    inner.closed.store(true, Ordering::Release);
    let _ = inner.close_tx.send(true);
    let err = inner.fatal.lock().expect("fatal slot poisoned").clone();
    let waiters: Vec<PendingResponse> = inner
        .pending
        .lock()
        .expect("pending queue poisoned")
        .drain(..)
        .collect();
    for waiter in waiters {
        let _ = waiter.send(Err(err.clone().unwrap_or(ConnectionError::Closed)));
    }
    inner.listeners.emit(&ConnectionEvent::Closed(err));
}
