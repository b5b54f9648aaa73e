//! TCP transport with optional TLS.
//!
//! Each connection attempt runs on its own tokio task, which is the only
//! place lifecycle events originate. Dialing, the TLS handshake, waiting for
//! the pinning validator, reacting to the timeout guard and reading all
//! happen in order on that task. Once the stream is ready its write half is
//! handed to a writer task that drains queued writes in order. The facade
//! talks to both over channels.
//!
//! # Shared State
//!
//! | Field | Guard | Touched by |
//! |-------|-------|------------|
//! | delegate | `RwLock` | `register`, connection task |
//! | timer slot | `Mutex` | `connect`, `disconnect`, drop, connection task |
//! | connection handle | `Mutex` | facade, connection task on exit |
//! | TLS flag | atomic | `connect`, `uses_tls` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::{TcpStream, lookup_host};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::pinning::{CertificatePinning, PinningCompletion, PinningDecision};

use super::Transport;
use super::builder::TransportBuilder;
use super::event::{ConnectionState, TransportEventClient};
use super::options::ConnectOptions;
use super::read_loop::{ReadBuffer, ReadOutcome};
use super::state::{SocketState, StateMachine, Transition};
use super::timeout::{TimeoutGuard, TimerSlot};
use super::tls::{self, TlsSettings};

// ============================================================================
// Types
// ============================================================================

/// Byte stream the read loop runs over, plain or TLS.
trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Control messages for the connection task.
#[derive(Debug)]
enum Control {
    /// `disconnect` was called.
    Cancel,
    /// The timeout guard fired.
    TimedOut,
}

/// A queued write and its completion.
struct WriteRequest {
    data: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Settings fixed at build time.
#[derive(Debug, Clone)]
pub(crate) struct TransportSettings {
    pub(crate) tls: TlsSettings,
    pub(crate) nodelay: bool,
    pub(crate) max_read_size: usize,
}

// ============================================================================
// Shared
// ============================================================================

/// Facade to the live connection task.
struct ConnectionHandle {
    id: ConnectionId,
    control_tx: mpsc::UnboundedSender<Control>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    running: Arc<AtomicBool>,
}

/// State shared between the facade and connection tasks.
struct Shared {
    delegate: RwLock<Option<Weak<dyn TransportEventClient>>>,
    timer: TimerSlot,
    connection: Mutex<Option<ConnectionHandle>>,
    uses_tls: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            delegate: RwLock::new(None),
            timer: TimerSlot::new(),
            connection: Mutex::new(None),
            uses_tls: AtomicBool::new(false),
        }
    }

    /// Hands `state` to the delegate, if one is still alive.
    fn deliver(&self, state: ConnectionState) {
        // Clone out so the delegate can re-register from inside the callback.
        let delegate = self.delegate.read().clone();

        match delegate.and_then(|weak| weak.upgrade()) {
            Some(delegate) => {
                trace!(event = state.name(), "Delivering event");
                delegate.connection_changed(state);
            }
            None => trace!(event = state.name(), "No delegate, dropping event"),
        }
    }

    /// Drops the connection handle if it still belongs to `id`.
    fn release(&self, id: ConnectionId) {
        let mut connection = self.connection.lock();
        if connection.as_ref().is_some_and(|handle| handle.id == id) {
            *connection = None;
        }
    }
}

// ============================================================================
// TcpTransport
// ============================================================================

/// TCP transport with optional TLS and certificate pinning.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use stream_transport::{ConnectOptions, ConnectionState, TcpTransport, Transport, TransportEventClient};
/// use url::Url;
///
/// struct Printer;
///
/// impl TransportEventClient for Printer {
///     fn connection_changed(&self, state: ConnectionState) {
///         println!("{state:?}");
///     }
/// }
///
/// # async fn example() -> stream_transport::Result<()> {
/// let printer = Arc::new(Printer);
/// let transport = TcpTransport::new()?;
/// transport.register_delegate(&printer);
///
/// let url = Url::parse("wss://example.com")?;
/// transport.connect(&url, ConnectOptions::default());
/// transport.write(b"hello".to_vec()).await?;
/// transport.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    shared: Arc<Shared>,
    settings: TransportSettings,
}

impl TcpTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the TLS configuration cannot be built.
    pub fn new() -> Result<Self> {
        TransportBuilder::new().build()
    }

    /// Returns a builder for custom configuration.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub(crate) fn with_settings(settings: TransportSettings) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            settings,
        }
    }

    /// Returns `true` while an attempt is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared
            .connection
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.running.load(Ordering::Acquire))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn connect(&self, url: &Url, options: ConnectOptions) {
        let endpoint = match Endpoint::from_url(url) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(%url, error = %err, "Rejecting connect request");
                self.shared.deliver(ConnectionState::Failed(err));
                return;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(%url, "connect called outside a tokio runtime");
                self.shared.deliver(ConnectionState::Failed(Error::NoRuntime));
                return;
            }
        };

        self.disconnect();

        let id = ConnectionId::generate();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));

        self.shared.uses_tls.store(endpoint.is_tls(), Ordering::Release);

        let timer_tx = control_tx.clone();
        self.shared.timer.replace(TimeoutGuard::arm(
            &runtime,
            id,
            options.timeout,
            move || {
                let _ = timer_tx.send(Control::TimedOut);
            },
        ));

        *self.shared.connection.lock() = Some(ConnectionHandle {
            id,
            control_tx,
            write_tx,
            running: Arc::clone(&running),
        });

        debug!(
            connection_id = %id,
            %endpoint,
            tls = endpoint.is_tls(),
            timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
            pinned = options.pinning.is_some(),
            "Connecting"
        );

        let task = ConnectionTask {
            id,
            pinning: if endpoint.is_tls() { options.pinning } else { None },
            endpoint,
            timeout: options.timeout,
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
            running,
            control_rx,
            write_rx: Some(write_rx),
            machine: StateMachine::new(),
        };

        runtime.spawn(task.run());
    }

    fn disconnect(&self) {
        self.shared.timer.cancel();

        let handle = self.shared.connection.lock().take();
        if let Some(handle) = handle {
            handle.running.store(false, Ordering::Release);
            let _ = handle.control_tx.send(Control::Cancel);
            debug!(connection_id = %handle.id, "Disconnect requested");
        }
    }

    async fn write(&self, data: Vec<u8>) -> Result<()> {
        let write_tx = match self.shared.connection.lock().as_ref() {
            Some(handle) => handle.write_tx.clone(),
            None => return Err(Error::NotConnected),
        };

        let (done, done_rx) = oneshot::channel();
        write_tx
            .send(WriteRequest { data, done })
            .map_err(|_| Error::NotConnected)?;

        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    fn register(&self, delegate: Weak<dyn TransportEventClient>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    fn uses_tls(&self) -> bool {
        self.shared.uses_tls.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("running", &self.is_running())
            .field("uses_tls", &self.uses_tls())
            .field("nodelay", &self.settings.nodelay)
            .field("max_read_size", &self.settings.max_read_size)
            .finish_non_exhaustive()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// ConnectionTask
// ============================================================================

/// Serial context of one connection attempt.
struct ConnectionTask {
    id: ConnectionId,
    endpoint: Endpoint,
    pinning: Option<Arc<dyn CertificatePinning>>,
    timeout: Duration,
    settings: TransportSettings,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    /// Handed to the writer once the stream is ready.
    write_rx: Option<mpsc::UnboundedReceiver<WriteRequest>>,
    machine: StateMachine,
}

impl ConnectionTask {
    async fn run(mut self) {
        self.notify(SocketState::Setup);

        if let Some(stream) = self.establish().await {
            self.notify(SocketState::Ready);
            info!(connection_id = %self.id, endpoint = %self.endpoint, "Connection ready");
            self.read_loop(stream).await;
        }

        self.finish();
    }

    // ========================================================================
    // Establishment
    // ========================================================================

    /// Dials, then runs TLS and pinning when required.
    async fn establish(&mut self) -> Option<Box<dyn Io>> {
        self.notify(SocketState::Preparing);

        let tcp = self.dial().await?;
        if !self.endpoint.is_tls() {
            return Some(Box::new(tcp));
        }

        let host = self.endpoint.host().to_string();
        let config = self.settings.tls.config(self.pinning.is_some());

        let stream = match self.guarded(tls::handshake(tcp, &host, config)).await? {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(err);
                return None;
            }
        };

        if let Some(pinning) = self.pinning.clone() {
            let chain = tls::peer_chain(&stream);
            debug!(connection_id = %self.id, chain_len = chain.len(), "Awaiting pinning decision");

            let (completion, pending) = PinningCompletion::channel();
            pinning.evaluate(chain, &host, completion);

            let decision = self
                .guarded(pending)
                .await?
                .unwrap_or(PinningDecision::Rejected);

            if !decision.is_accepted() {
                self.fail(Error::pinning_rejected(host));
                return None;
            }
        }

        Some(Box::new(stream))
    }

    /// Resolves the host and tries each address in turn.
    async fn dial(&mut self) -> Option<TcpStream> {
        let host = self.endpoint.host().to_string();
        let port = self.endpoint.port();

        let addrs: Vec<_> = match self.guarded(lookup_host((host.clone(), port))).await? {
            Ok(addrs) => addrs.collect(),
            Err(err) => {
                self.fail(err.into());
                return None;
            }
        };

        if addrs.is_empty() {
            self.fail(Error::resolve(host));
            return None;
        }

        let last = addrs.len() - 1;
        for (index, addr) in addrs.into_iter().enumerate() {
            match self.guarded(TcpStream::connect(addr)).await? {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(self.settings.nodelay) {
                        warn!(connection_id = %self.id, error = %err, "Failed to set TCP_NODELAY");
                    }
                    trace!(connection_id = %self.id, %addr, "TCP connected");
                    return Some(stream);
                }
                Err(err) if index < last => {
                    debug!(connection_id = %self.id, %addr, error = %err, "Address failed, trying next");
                    self.notify(SocketState::Waiting(err.into()));
                }
                Err(err) => {
                    self.fail(err.into());
                    return None;
                }
            }
        }

        None
    }

    /// Drives `fut` while watching for cancellation and the timeout.
    ///
    /// Returns `None` once the attempt has been terminated.
    async fn guarded<F>(&mut self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;

            control = self.control_rx.recv() => {
                let transition = match control {
                    Some(Control::TimedOut) => {
                        warn!(connection_id = %self.id, endpoint = %self.endpoint, "Connect timed out");
                        self.machine.on_timeout(self.timeout)
                    }
                    Some(Control::Cancel) | None => self.machine.apply(SocketState::Cancelled),
                };
                self.commit(transition);
                None
            }

            output = fut => Some(output),
        }
    }

    // ========================================================================
    // Read Loop
    // ========================================================================

    /// Delivers inbound chunks until terminated.
    ///
    /// Writes run on their own [`Writer`] task so a stalled write never
    /// holds up reads or control messages. A clean end of stream stops
    /// reading without an event; the task keeps serving writes and control
    /// messages until cancelled.
    async fn read_loop(&mut self, stream: Box<dyn Io>) {
        let (mut reader, writer) = tokio::io::split(stream);
        let _writer = self
            .write_rx
            .take()
            .map(|requests| Writer::spawn(self.id, writer, requests));

        let mut buffer = ReadBuffer::new(self.settings.max_read_size);
        let mut reading = true;

        loop {
            if !self.running.load(Ordering::Acquire) {
                self.notify(SocketState::Cancelled);
                return;
            }

            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(Control::TimedOut) => {
                        let transition = self.machine.on_timeout(self.timeout);
                        self.commit(transition);
                    }
                    Some(Control::Cancel) | None => {
                        self.notify(SocketState::Cancelled);
                        return;
                    }
                },

                outcome = buffer.read_from(&mut reader), if reading => match outcome {
                    Ok(ReadOutcome::Chunk(bytes)) => self.receive(bytes),
                    Ok(ReadOutcome::Pending) => {}
                    Ok(ReadOutcome::Finished(rest)) => {
                        if let Some(rest) = rest {
                            self.receive(rest);
                        }
                        reading = false;
                        debug!(connection_id = %self.id, "Stream complete");
                    }
                    Err(err) => {
                        self.fail(err.into());
                        return;
                    }
                },
            }
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn notify(&mut self, state: SocketState) {
        let transition = self.machine.apply(state);
        self.commit(transition);
    }

    fn fail(&mut self, err: Error) {
        warn!(connection_id = %self.id, endpoint = %self.endpoint, error = %err, "Connection failed");
        self.notify(SocketState::Failed(err));
    }

    fn receive(&self, bytes: Vec<u8>) {
        trace!(connection_id = %self.id, bytes = bytes.len(), "Received chunk");
        if let Some(event) = self.machine.on_data(bytes) {
            self.shared.deliver(event);
        }
    }

    /// Applies a transition; the guard is released before the event goes out.
    fn commit(&self, transition: Transition) {
        if transition.cancel_timeout {
            self.shared.timer.cancel_for(self.id);
        }
        if let Some(event) = transition.event {
            debug!(connection_id = %self.id, event = event.name(), "State changed");
            self.shared.deliver(event);
        }
    }

    fn finish(&mut self) {
        self.running.store(false, Ordering::Release);
        self.shared.timer.cancel_for(self.id);
        self.shared.release(self.id);
        debug!(
            connection_id = %self.id,
            ready = self.machine.is_ready(),
            terminated = self.machine.is_terminated(),
            "Connection task finished"
        );
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Task draining queued writes into the write half, in order.
///
/// Write failures go to the request's completion only. Dropping the writer
/// aborts the task; requests still queued then resolve as
/// [`Error::ConnectionClosed`].
struct Writer {
    task: JoinHandle<()>,
}

impl Writer {
    fn spawn(
        id: ConnectionId,
        mut half: WriteHalf<Box<dyn Io>>,
        mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let len = request.data.len();
                let result = write_chunk(&mut half, &request.data).await;
                match &result {
                    Ok(()) => trace!(connection_id = %id, bytes = len, "Write completed"),
                    Err(err) => warn!(connection_id = %id, error = %err, "Write failed"),
                }
                let _ = request.done.send(result);
            }
        });

        Self { task }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Writes and flushes one request.
async fn write_chunk<W>(half: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    half.write_all(data).await?;
    half.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use rcgen::CertifiedKey;
    use rustls::ServerConfig;
    use rustls::crypto::ring;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};
    use tokio_rustls::TlsAcceptor;

    use crate::pinning::{FingerprintPinning, TrustChain};

    // ========================================================================
    // Helpers
    // ========================================================================

    const EVENT_WAIT: Duration = Duration::from_secs(5);

    struct ChannelClient {
        tx: mpsc::UnboundedSender<ConnectionState>,
    }

    impl TransportEventClient for ChannelClient {
        fn connection_changed(&self, state: ConnectionState) {
            let _ = self.tx.send(state);
        }
    }

    fn recorder() -> (Arc<ChannelClient>, mpsc::UnboundedReceiver<ConnectionState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelClient { tx }), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionState>) -> ConnectionState {
        timeout(EVENT_WAIT, rx.recv())
            .await
            .expect("event within deadline")
            .expect("recorder alive")
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, wait: Duration) {
        if let Ok(Some(event)) = timeout(wait, rx.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }

    /// Collects `Receive` payloads until `len` bytes arrived.
    async fn receive_exact(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        while received.len() < len {
            match next_event(rx).await {
                ConnectionState::Receive(bytes) => received.extend(bytes),
                other => panic!("expected receive, got {other:?}"),
            }
        }
        received
    }

    fn url(scheme: &str, addr: SocketAddr) -> Url {
        Url::parse(&format!("{scheme}://{addr}")).expect("valid url")
    }

    async fn spawn_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = tokio::io::split(stream);
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });

        addr
    }

    /// Accepts connections and never answers.
    async fn spawn_silent() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        addr
    }

    fn identity() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string(), "localhost".to_string()])
                .expect("generate certificate");

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        (cert.der().clone(), key)
    }

    async fn spawn_tls_echo() -> (SocketAddr, CertificateDer<'static>) {
        let (cert, key) = identity();

        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key)
            .expect("server config");
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(tls) = acceptor.accept(stream).await {
                        let (mut reader, mut writer) = tokio::io::split(tls);
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    }
                });
            }
        });

        (addr, cert)
    }

    fn trusting(cert: &CertificateDer<'static>) -> TcpTransport {
        TcpTransport::builder()
            .webpki_roots(false)
            .add_root_certificate(cert.clone())
            .build()
            .expect("build transport")
    }

    fn untrusting() -> TcpTransport {
        TcpTransport::builder()
            .webpki_roots(false)
            .build()
            .expect("build transport")
    }

    struct Verdict(PinningDecision);

    impl CertificatePinning for Verdict {
        fn evaluate(&self, _chain: TrustChain, _domain: &str, completion: PinningCompletion) {
            completion.complete(self.0);
        }
    }

    /// Answers from another thread after a delay.
    struct Deferred;

    impl CertificatePinning for Deferred {
        fn evaluate(&self, chain: TrustChain, _domain: &str, completion: PinningCompletion) {
            assert!(!chain.is_empty());
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                completion.complete(PinningDecision::Accepted);
            });
        }
    }

    /// Keeps every completion without answering.
    #[derive(Default)]
    struct Hoarding(Mutex<Vec<PinningCompletion>>);

    impl CertificatePinning for Hoarding {
        fn evaluate(&self, _chain: TrustChain, _domain: &str, completion: PinningCompletion) {
            self.0.lock().push(completion);
        }
    }

    // ========================================================================
    // Facade
    // ========================================================================

    #[tokio::test]
    async fn test_invalid_endpoint_fails_synchronously() {
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&Url::parse("ftp://example.com").expect("url"), ConnectOptions::new());

        match rx.try_recv() {
            Ok(ConnectionState::Failed(Error::InvalidRequest { .. })) => {}
            other => panic!("expected invalid request, got {other:?}"),
        }
        assert!(!transport.is_running());
        assert!(!transport.uses_tls());
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&Url::parse("tcp://127.0.0.1:1").expect("url"), ConnectOptions::new());

        assert!(matches!(rx.try_recv(), Ok(ConnectionState::Failed(Error::NoRuntime))));
    }

    #[tokio::test]
    async fn test_write_without_connection() {
        let transport = TcpTransport::new().expect("transport");
        let err = transport.write(b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let transport = TcpTransport::new().expect("transport");
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_running());
    }

    #[test]
    fn test_debug_reports_settings() {
        let transport = TcpTransport::builder()
            .max_read_size(64)
            .build()
            .expect("build transport");

        let debug = format!("{transport:?}");
        assert!(debug.contains("TcpTransport"));
        assert!(debug.contains("max_read_size: 64"));
        assert!(debug.contains("running: false"));
    }

    // ========================================================================
    // Plain TCP
    // ========================================================================

    #[tokio::test]
    async fn test_plain_receive_then_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            stream.write_all(&[9u8; 10]).await.expect("write");
            stream.shutdown().await.expect("shutdown");
        });

        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);
        transport.connect(&url("tcp", addr), ConnectOptions::new().with_timeout(Duration::from_secs(1)));

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        assert!(!transport.uses_tls());
        assert_eq!(receive_exact(&mut rx, 10).await, vec![9u8; 10]);

        // End of stream is not a failure.
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_no_timeout_after_success() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new().with_timeout(Duration::from_millis(200)));

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        assert_quiet(&mut rx, Duration::from_millis(500)).await;
        assert!(transport.is_running());
    }

    #[tokio::test]
    async fn test_write_echo() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        transport.write(b"ping".to_vec()).await.expect("write");
        assert_eq!(receive_exact(&mut rx, 4).await, b"ping");
    }

    #[tokio::test]
    async fn test_write_before_ready_is_flushed() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        transport.write(b"early".to_vec()).await.expect("write");

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        assert_eq!(receive_exact(&mut rx, 5).await, b"early");
    }

    #[tokio::test]
    async fn test_disconnect_twice_cancels_once() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        transport.disconnect();
        transport.disconnect();

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Cancelled));
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
        assert!(!transport.is_running());

        let err = transport.write(b"late".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_attempt() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        transport.connect(&url("tcp", addr), ConnectOptions::new());

        let mut cancelled = 0;
        let mut connected = 0;
        while cancelled + connected < 2 {
            match next_event(&mut rx).await {
                ConnectionState::Cancelled => cancelled += 1,
                ConnectionState::Connected => connected += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!((cancelled, connected), (1, 1));

        transport.write(b"again".to_vec()).await.expect("write");
        assert_eq!(receive_exact(&mut rx, 5).await, b"again");
    }

    #[tokio::test]
    async fn test_drop_cancels_connection() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        drop(transport);
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_delegate_is_ignored() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);
        drop(client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        transport.write(b"x1".to_vec()).await.expect("write");

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_reset_fails_and_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            // Zero linger turns close into RST.
            #[allow(deprecated)]
            stream.set_linger(Some(Duration::ZERO)).expect("linger");
            sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);
        transport.connect(&url("tcp", addr), ConnectOptions::new());

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Failed(Error::Io(_))));
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_to_caller_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            drop(stream);
        });

        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);
        transport.connect(&url("tcp", addr), ConnectOptions::new());

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        // Let the peer's FIN end reading before anything is written.
        sleep(Duration::from_millis(100)).await;

        let mut failure = None;
        for _ in 0..50 {
            if let Err(err) = transport.write(vec![0u8; 1024]).await {
                failure = Some(err);
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }

        assert!(matches!(failure, Some(Error::Io(_))), "got {failure:?}");
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
        assert!(transport.is_running());
    }

    #[tokio::test]
    async fn test_large_write_to_echo_completes() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        let payload = vec![0x5a; 8 * 1024 * 1024];
        let len = payload.len();
        let (written, received) = tokio::join!(transport.write(payload), receive_exact(&mut rx, len));

        written.expect("write");
        assert_eq!(received.len(), len);
        assert!(received.iter().all(|&byte| byte == 0x5a));
    }

    #[tokio::test]
    async fn test_disconnect_during_blocked_write() {
        let addr = spawn_silent().await;
        let (client, mut rx) = recorder();
        let transport = Arc::new(TcpTransport::new().expect("transport"));
        transport.register_delegate(&client);

        transport.connect(&url("tcp", addr), ConnectOptions::new());
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        let writing = Arc::clone(&transport);
        let write = tokio::spawn(async move { writing.write(vec![0u8; 64 * 1024 * 1024]).await });
        sleep(Duration::from_millis(200)).await;
        assert!(!write.is_finished());

        transport.disconnect();
        assert!(matches!(next_event(&mut rx).await, ConnectionState::Cancelled));

        let result = timeout(EVENT_WAIT, write)
            .await
            .expect("write resolves")
            .expect("write task");
        assert!(matches!(result, Err(Error::ConnectionClosed)), "got {result:?}");
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
        assert!(!transport.is_running());
    }

    // ========================================================================
    // Timeout
    // ========================================================================

    #[tokio::test]
    async fn test_handshake_timeout() {
        let addr = spawn_silent().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        transport.connect(&url("wss", addr), ConnectOptions::new().with_timeout(Duration::from_millis(300)));

        match next_event(&mut rx).await {
            ConnectionState::Failed(err) => assert!(err.is_timeout(), "got {err}"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_quiet(&mut rx, Duration::from_millis(300)).await;
        assert!(!transport.is_running());
    }

    // ========================================================================
    // TLS
    // ========================================================================

    #[tokio::test]
    async fn test_tls_with_trusted_root() {
        let (addr, cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = trusting(&cert);
        transport.register_delegate(&client);

        transport.connect(&url("wss", addr), ConnectOptions::new());

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        assert!(transport.uses_tls());

        transport.write(b"secure".to_vec()).await.expect("write");
        assert_eq!(receive_exact(&mut rx, 6).await, b"secure");
    }

    #[tokio::test]
    async fn test_tls_untrusted_root_fails() {
        let (addr, _cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = untrusting();
        transport.register_delegate(&client);

        transport.connect(&url("wss", addr), ConnectOptions::new());

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Failed(Error::Tls { .. })));
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_pinning_rejection_never_connects() {
        let (addr, cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = trusting(&cert);
        transport.register_delegate(&client);

        let options = ConnectOptions::new().with_pinning(Arc::new(Verdict(PinningDecision::Rejected)));
        transport.connect(&url("wss", addr), options);

        match next_event(&mut rx).await {
            ConnectionState::Failed(err) => assert!(matches!(err, Error::PinningRejected { .. })),
            other => panic!("expected pinning failure, got {other:?}"),
        }
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_fingerprint_pinning_overrides_default_trust() {
        let (addr, cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = untrusting();
        transport.register_delegate(&client);

        let pinning = FingerprintPinning::new().with_certificate(&cert);
        transport.connect(&url("wss", addr), ConnectOptions::new().with_pinning(Arc::new(pinning)));

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
        transport.write(b"pinned".to_vec()).await.expect("write");
        assert_eq!(receive_exact(&mut rx, 6).await, b"pinned");
    }

    #[tokio::test]
    async fn test_pinning_answered_from_other_thread() {
        let (addr, _cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = untrusting();
        transport.register_delegate(&client);

        transport.connect(&url("wss", addr), ConnectOptions::new().with_pinning(Arc::new(Deferred)));

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_unanswered_pinning_times_out() {
        let (addr, _cert) = spawn_tls_echo().await;
        let (client, mut rx) = recorder();
        let transport = untrusting();
        transport.register_delegate(&client);

        let hoarding = Arc::new(Hoarding::default());
        let options = ConnectOptions::new()
            .with_timeout(Duration::from_millis(300))
            .with_pinning(Arc::clone(&hoarding) as Arc<dyn CertificatePinning>);
        transport.connect(&url("wss", addr), options);

        match next_event(&mut rx).await {
            ConnectionState::Failed(err) => assert!(err.is_timeout(), "got {err}"),
            other => panic!("expected timeout, got {other:?}"),
        }

        // Answering after the attempt ended goes nowhere.
        for completion in hoarding.0.lock().drain(..) {
            completion.complete(PinningDecision::Accepted);
        }
        assert_quiet(&mut rx, Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_pinning_ignored_for_plain() {
        let addr = spawn_echo().await;
        let (client, mut rx) = recorder();
        let transport = TcpTransport::new().expect("transport");
        transport.register_delegate(&client);

        let options = ConnectOptions::new().with_pinning(Arc::new(Verdict(PinningDecision::Rejected)));
        transport.connect(&url("ws", addr), options);

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_read_size_caps_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            stream.write_all(&[1u8; 64]).await.expect("write");
            let mut sink = [0u8; 1];
            let _ = stream.read(&mut sink).await;
        });

        let (client, mut rx) = recorder();
        let transport = TcpTransport::builder().max_read_size(16).build().expect("transport");
        transport.register_delegate(&client);
        transport.connect(&url("tcp", addr), ConnectOptions::new());

        assert!(matches!(next_event(&mut rx).await, ConnectionState::Connected));

        let mut total = 0;
        while total < 64 {
            match next_event(&mut rx).await {
                ConnectionState::Receive(bytes) => {
                    assert!(bytes.len() <= 16);
                    total += bytes.len();
                }
                other => panic!("expected receive, got {other:?}"),
            }
        }
        assert_eq!(total, 64);
    }
}
