//! Connection orchestration.
//!
//! Wires the frame decoder, message router, request correlator, and
//! transport writer together over a duplex byte stream: a reader task feeds
//! arriving chunks through the decoder and dispatches every complete
//! message, a writer task drains framed buffers into the sink, and the
//! public API covers sending requests/responses/events, subscribing, and
//! closing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::correlator::RequestCorrelator;
use crate::decoder::{Decoded, FrameDecoder, DEFAULT_MAX_BUFFER_SIZE};
use crate::error::TransportError;
use crate::protocol::{Event, Request, Response};
use crate::router::MessageRouter;
use crate::seq::SequenceGenerator;
use crate::writer::TransportWriter;

/// Default deadline for outstanding requests (seconds).
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Capacity of the outbound write channel.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Tuning knobs for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Cap on unconsumed decoder-buffer bytes. Exceeding it is fatal and
    /// closes the connection.
    pub max_buffer_size: usize,
    /// Deadline applied to every outstanding request; `None` disables
    /// request timeouts.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            request_timeout: Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
        }
    }
}

/// State shared between the connection handle and its reader task.
struct Shared {
    correlator: Mutex<RequestCorrelator>,
    router: Mutex<MessageRouter>,
    /// Inbound request seqs that have already been answered.
    answered: Mutex<HashSet<i64>>,
    closed: AtomicBool,
}

impl Shared {
    /// Transition Open → Closed and drain all pending requests. Idempotent;
    /// the first caller wins.
    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.correlator.lock().unwrap().reject_all();
    }

    fn dispatch(&self, item: Decoded) {
        match item {
            Decoded::Message(msg) => {
                let router = self.router.lock().unwrap();
                let mut correlator = self.correlator.lock().unwrap();
                router.dispatch(msg, &mut correlator);
            }
            Decoded::Error(err) => {
                self.router.lock().unwrap().report(err);
            }
        }
    }
}

/// A live DAP connection over a duplex byte stream.
///
/// One instance per adapter connection; independent connections share
/// nothing. The internal state (decoder buffer, pending map, sequence
/// counter, subscriber slots) is owned exclusively by the connection and
/// never exposed. Lifecycle is `Open` → `Closed`, terminal; decoding and
/// correlation operate only while open.
pub struct Connection {
    shared: Arc<Shared>,
    seq: Arc<SequenceGenerator>,
    writer: TransportWriter,
    config: ConnectionConfig,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Open a connection over the given byte source and sink and start its
    /// reader and writer tasks.
    ///
    /// The source and sink are whatever the host provides: a child
    /// process's stdio, a socket, or an in-memory pipe in tests.
    pub fn new<R, W>(source: R, sink: W, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            correlator: Mutex::new(RequestCorrelator::new()),
            router: Mutex::new(MessageRouter::new()),
            answered: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });
        let seq = Arc::new(SequenceGenerator::new());

        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
        let writer_task = tokio::spawn(write_loop(sink, write_rx, Arc::clone(&shared)));
        let reader_task = tokio::spawn(read_loop(
            source,
            Arc::clone(&shared),
            config.max_buffer_size,
        ));

        Self {
            shared,
            seq: Arc::clone(&seq),
            writer: TransportWriter::new(seq, write_tx),
            config,
            reader_task,
            writer_task,
        }
    }

    /// Send a request and await the matching response.
    ///
    /// The response is matched by sequence number, never by arrival order;
    /// responses to concurrent requests may come back in any interleaving.
    /// A failed response (`success = false`) surfaces as
    /// [`TransportError::Rejected`] carrying the adapter's message. When a
    /// request timeout is configured, expiry removes this entry and fails
    /// only this call.
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response, TransportError> {
        self.ensure_open()?;

        let seq = self.seq.next();
        // Register before writing so a fast response cannot beat the
        // pending entry into the map.
        let rx = self.shared.correlator.lock().unwrap().register(seq, command);
        // Close may have raced the registration; the drain pass runs after
        // the closed flag is set, so re-checking here catches an entry that
        // slipped in behind it.
        if self.is_closed() {
            self.shared.correlator.lock().unwrap().cancel(seq);
            return Err(TransportError::ConnectionClosed);
        }

        if let Err(err) = self.writer.write_request(seq, command, arguments).await {
            self.shared.correlator.lock().unwrap().cancel(seq);
            return Err(err);
        }

        let received = match self.config.request_timeout {
            Some(deadline) => match timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.shared.correlator.lock().unwrap().cancel(seq);
                    return Err(TransportError::Timeout {
                        command: command.to_string(),
                    });
                }
            },
            None => rx.await,
        };
        // Every removal path (resolve, cancel, timeout sweep, close)
        // delivers an explicit outcome; a dropped sender without one means
        // the connection is gone.
        received.map_err(|_| TransportError::ConnectionClosed)?
    }

    /// Send a response to a peer-initiated request.
    ///
    /// Exactly one response may be sent per inbound `request_seq`; a second
    /// attempt fails with [`TransportError::DuplicateResponse`] and writes
    /// nothing to the wire. Returns the envelope's own sequence number.
    pub async fn send_response(
        &self,
        request_seq: i64,
        command: &str,
        success: bool,
        body: Option<serde_json::Value>,
        message: Option<String>,
    ) -> Result<i64, TransportError> {
        self.ensure_open()?;

        {
            let mut answered = self.shared.answered.lock().unwrap();
            if !answered.insert(request_seq) {
                return Err(TransportError::DuplicateResponse { request_seq });
            }
        }

        match self
            .writer
            .write_response(request_seq, command, success, body, message)
            .await
        {
            Ok(seq) => Ok(seq),
            Err(err) => {
                // Nothing reached the wire; allow a retry.
                self.shared.answered.lock().unwrap().remove(&request_seq);
                Err(err)
            }
        }
    }

    /// Send a locally-originated event.
    pub async fn send_event(
        &self,
        event: &str,
        body: Option<serde_json::Value>,
    ) -> Result<i64, TransportError> {
        self.ensure_open()?;
        self.writer.write_event(event, body).await
    }

    /// Subscribe to events from the peer.
    ///
    /// Single slot: registering a new handler silently replaces the
    /// previous one. Handlers run inline on the read path; keep them quick
    /// and hand real work off to a channel or task rather than calling back
    /// into the connection from inside the handler.
    pub fn on_event(&self, handler: impl Fn(Event) + Send + Sync + 'static) {
        self.shared
            .router
            .lock()
            .unwrap()
            .set_event_handler(Box::new(handler));
    }

    /// Subscribe to peer-initiated requests. Single slot, latest wins.
    pub fn on_request(&self, handler: impl Fn(Request) + Send + Sync + 'static) {
        self.shared
            .router
            .lock()
            .unwrap()
            .set_request_handler(Box::new(handler));
    }

    /// Subscribe to recoverable transport errors (decode failures,
    /// unmatched responses). Single slot, latest wins.
    pub fn on_error(&self, handler: impl Fn(TransportError) + Send + Sync + 'static) {
        self.shared
            .router
            .lock()
            .unwrap()
            .set_error_handler(Box::new(handler));
    }

    /// Cancel a pending request. Returns true if it was still outstanding.
    ///
    /// A response that arrives after cancellation is reported as unmatched;
    /// the stream itself is untouched. A caller still awaiting the
    /// cancelled request observes [`TransportError::Cancelled`].
    pub fn cancel(&self, seq: i64) -> bool {
        self.shared.correlator.lock().unwrap().cancel(seq)
    }

    /// Close the connection.
    ///
    /// Stops both stream tasks, rejects every pending request with
    /// [`TransportError::ConnectionClosed`], and makes all further sends
    /// fail likewise. Idempotent.
    pub fn close(&self) {
        self.shared.mark_closed();
        self.reader_task.abort();
        self.writer_task.abort();
    }

    /// Whether the connection has reached the terminal `Closed` state.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reader task: stream bytes → decoder → router, in arrival order.
///
/// The decoder state and pending map are only ever touched from this single
/// delivery path, so messages are dispatched in exactly the order the peer
/// sent them.
async fn read_loop<R>(mut source: R, shared: Arc<Shared>, max_buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::with_max_buffer(max_buffer_size);
    let mut chunk = [0u8; 8 * 1024];

    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match source.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("peer closed the stream");
                break;
            }
            Ok(n) => match decoder.feed(&chunk[..n]) {
                Ok(items) => {
                    for item in items {
                        shared.dispatch(item);
                    }
                }
                Err(fatal) => {
                    tracing::error!(%fatal, "fatal decode error, closing connection");
                    shared.router.lock().unwrap().report(fatal);
                    break;
                }
            },
            Err(err) => {
                tracing::warn!(%err, "stream read failed");
                shared.router.lock().unwrap().report(TransportError::Io(err));
                break;
            }
        }
    }

    decoder.reset();
    shared.mark_closed();
}

/// Writer task: drains framed buffers into the sink, one message per
/// buffer so writes are atomic at message granularity. A write or flush
/// failure closes the connection, so no caller is left waiting on a dead
/// sink.
async fn write_loop<W>(mut sink: W, mut rx: mpsc::Receiver<Vec<u8>>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(buf) = rx.recv().await {
        let outcome = match sink.write_all(&buf).await {
            Ok(()) => sink.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            tracing::warn!(%err, "stream write failed");
            shared.router.lock().unwrap().report(TransportError::Io(err));
            shared.mark_closed();
            break;
        }
    }
}
