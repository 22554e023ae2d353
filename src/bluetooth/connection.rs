// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection manager for the feeder link.
//!
//! Owns the single RFCOMM link and its lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnecting -> Idle
//!            |  \                         ^
//!            |   `-----(cancelled)--------'
//!            `-> Idle (connect failed)
//! ```
//!
//! Each connected period runs one reader task and one writer task. Events are
//! pushed into an unbounded channel in the order they happen; a single
//! consumer (see [`crate::events::spawn_dispatcher`]) drains it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::DeviceAddress;
use super::error::LinkError;
use super::platform::{Link, PlatformConnector};
use super::protocol::{FeederCommand, OutboundMessage, ScheduleSnapshot};
use super::reassembler::LineReassembler;
use crate::schedule::ScheduleEntry;

/// How long teardown waits for the writer to flush and close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Link established.
    Connected,
    /// Link closed, whoever closed it.
    Disconnected,
    /// Something failed; the link may or may not still be up.
    Error(LinkError),
    /// One line received from the feeder.
    Message(String),
}

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Whether `self -> to` is an edge of the lifecycle.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Idle)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        }
    }
}

/// Outcome of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRequest {
    /// A new attempt was started.
    Started,
    /// A link is already being set up or in use; nothing was done.
    AlreadyActive(ConnectionState),
}

/// Runtime settings of the link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Upper bound on the platform connect call.
    pub connect_timeout: Duration,
    /// Consecutive write failures that force a disconnect; 0 never does.
    pub max_write_failures: u32,
    /// Capacity of the outbound queue.
    pub send_queue_depth: usize,
    /// Size of a single read from the link.
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            max_write_failures: 3,
            send_queue_depth: 16,
            read_buffer_size: 1024,
        }
    }
}

/// An encoded frame waiting for the writer.
struct OutboundFrame {
    what: String,
    bytes: Vec<u8>,
}

/// Everything belonging to one connected period.
struct LinkHandle {
    outbound: mpsc::Sender<OutboundFrame>,
    stop: oneshot::Sender<()>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkHandle {
    /// Close the write side, then the read side, then release the stream.
    async fn close(self) {
        let LinkHandle {
            outbound,
            stop,
            reader,
            mut writer,
        } = self;

        drop(outbound);
        let _ = stop.send(());

        match tokio::time::timeout(CLOSE_GRACE, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Writer task ended abnormally: {}", e),
            Err(_) => {
                warn!("Writer did not stop within {:?}, aborting", CLOSE_GRACE);
                writer.abort();
            }
        }

        reader.abort();
        if let Err(e) = reader.await {
            if !e.is_cancelled() {
                warn!("Reader task ended abnormally: {}", e);
            }
        }

        debug!("Link released");
    }
}

struct Lifecycle {
    state: ConnectionState,
    /// Bumped on every connect; tasks of older cycles are stale.
    cycle: u64,
    address: Option<DeviceAddress>,
    link: Option<LinkHandle>,
    connect_task: Option<JoinHandle<()>>,
}

impl Lifecycle {
    fn transition(&mut self, to: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {:?} -> {:?}",
            self.state,
            to
        );
        debug!("Connection state: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.cycle == cycle && self.state == ConnectionState::Connected
    }
}

struct Shared<P> {
    platform: P,
    config: LinkConfig,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    /// Number of links still being torn down.
    teardowns: watch::Sender<usize>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Manages the link to one feeder at a time.
///
/// Cheap to clone; all clones drive the same link.
pub struct ConnectionManager<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for ConnectionManager<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: PlatformConnector> ConnectionManager<P> {
    /// Create a new connection manager.
    ///
    /// Returns the manager and the receiving end of its event channel.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        platform: P,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (teardowns, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            platform,
            config,
            runtime: Handle::current(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Idle,
                cycle: 0,
                address: None,
                link: None,
                connect_task: None,
            }),
            teardowns,
            event_tx,
        });

        (Self { shared }, event_rx)
    }

    /// Start connecting to `address`.
    ///
    /// Only valid from `Idle`; otherwise the call does nothing and reports the
    /// current state. The outcome arrives later as a `Connected` or `Error`
    /// event.
    pub fn connect(&self, address: DeviceAddress) -> ConnectRequest {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state != ConnectionState::Idle {
            info!(
                "Connect to {} ignored, link is {}",
                address,
                lifecycle.state.as_str()
            );
            return ConnectRequest::AlreadyActive(lifecycle.state);
        }

        lifecycle.cycle += 1;
        lifecycle.transition(ConnectionState::Connecting);
        lifecycle.address = Some(address);

        let cycle = lifecycle.cycle;
        let shared = Arc::clone(&self.shared);
        info!("Connecting to {}...", address);
        lifecycle.connect_task = Some(
            self.shared
                .runtime
                .spawn(async move { shared.run_connect(cycle, address).await }),
        );

        ConnectRequest::Started
    }

    /// Tear down the link or abort a pending attempt.
    ///
    /// Idempotent and non-blocking, so it can be called from an observer or
    /// from the link's own tasks.
    pub fn disconnect(&self) {
        self.shared.shut_down(None, None);
    }

    /// Queue a command for the feeder.
    pub fn send_command(&self, command: FeederCommand) -> Result<(), LinkError> {
        self.send(OutboundMessage::Command(command))
    }

    /// Queue a free-form command token.
    pub fn send_raw(&self, token: &str) -> Result<(), LinkError> {
        self.send_command(FeederCommand::parse(token)?)
    }

    /// Queue the full schedule, sorted by time.
    pub fn send_schedule(&self, entries: &[ScheduleEntry]) -> Result<(), LinkError> {
        self.send(OutboundMessage::Schedule(ScheduleSnapshot::from_entries(
            entries,
        )))
    }

    /// Queue one outbound message.
    ///
    /// Fails immediately with [`LinkError::NotConnected`] unless the link is
    /// up. Write errors are reported later as events.
    pub fn send(&self, message: OutboundMessage) -> Result<(), LinkError> {
        let lifecycle = self.shared.lifecycle.lock();
        let link = match (lifecycle.state, &lifecycle.link) {
            (ConnectionState::Connected, Some(link)) => link,
            _ => return Err(LinkError::NotConnected),
        };

        let frame = OutboundFrame {
            what: message.describe(),
            bytes: message.encode(),
        };
        link.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::QueueFull,
            TrySendError::Closed(_) => LinkError::NotConnected,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the current or most recent connection attempt.
    pub fn address(&self) -> Option<DeviceAddress> {
        self.shared.lifecycle.lock().address
    }

    /// The platform links are opened through.
    pub fn platform(&self) -> &P {
        &self.shared.platform
    }
}

impl<P: PlatformConnector> Shared<P> {
    fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event dropped, no receiver");
        }
    }

    async fn run_connect(self: Arc<Self>, cycle: u64, address: DeviceAddress) {
        // The previous link must be fully released before opening another.
        let mut teardowns = self.teardowns.subscribe();
        let _ = teardowns.wait_for(|pending| *pending == 0).await;

        let result =
            match tokio::time::timeout(self.config.connect_timeout, self.platform.connect(address))
                .await
            {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(e)) => Err(LinkError::from(e)),
                Err(_) => Err(LinkError::ConnectFailed(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                ))),
            };

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.cycle != cycle || lifecycle.state != ConnectionState::Connecting {
            debug!("Discarding result of cancelled connect to {}", address);
            return;
        }
        lifecycle.connect_task = None;

        match result {
            Ok(link) => {
                lifecycle.link = Some(self.start_link(cycle, link));
                lifecycle.transition(ConnectionState::Connected);
                info!("Connected to {}", address);
                self.emit(ConnectionEvent::Connected);
            }
            Err(e) => {
                lifecycle.transition(ConnectionState::Idle);
                error!("Connection to {} failed: {}", address, e);
                self.emit(ConnectionEvent::Error(e));
            }
        }
    }

    fn start_link(self: &Arc<Self>, cycle: u64, link: Link) -> LinkHandle {
        let (read_half, write_half) = tokio::io::split(link);
        let (outbound, frames) = mpsc::channel(self.config.send_queue_depth.max(1));
        let (stop, stop_rx) = oneshot::channel();

        let reader = self
            .runtime
            .spawn(Arc::clone(self).read_loop(cycle, read_half));
        let writer = self
            .runtime
            .spawn(Arc::clone(self).write_loop(cycle, write_half, frames, stop_rx));

        LinkHandle {
            outbound,
            stop,
            reader,
            writer,
        }
    }

    /// Move to `Idle`, releasing whatever the current state holds.
    ///
    /// With `only_cycle`, acts only if that cycle is still connected, so a
    /// stale task cannot tear down a newer link. `cause` is emitted as an
    /// error before `Disconnected`. Returns whether anything was torn down.
    fn shut_down(self: &Arc<Self>, only_cycle: Option<u64>, cause: Option<LinkError>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(cycle) = only_cycle {
            if !lifecycle.is_current(cycle) {
                return false;
            }
        }

        match lifecycle.state {
            ConnectionState::Idle | ConnectionState::Disconnecting => return false,
            ConnectionState::Connecting => {
                lifecycle.transition(ConnectionState::Disconnecting);
                if let Some(task) = lifecycle.connect_task.take() {
                    task.abort();
                }
                info!("Connection attempt cancelled");
            }
            ConnectionState::Connected => {
                lifecycle.transition(ConnectionState::Disconnecting);
                if let Some(link) = lifecycle.link.take() {
                    self.teardowns.send_modify(|pending| *pending += 1);
                    let shared = Arc::clone(self);
                    self.runtime.spawn(async move {
                        link.close().await;
                        shared.teardowns.send_modify(|pending| *pending -= 1);
                    });
                }
                info!("Disconnected");
            }
        }

        if let Some(cause) = cause {
            self.emit(ConnectionEvent::Error(cause));
        }
        lifecycle.transition(ConnectionState::Idle);
        self.emit(ConnectionEvent::Disconnected);
        true
    }

    /// Emit received lines if `cycle` is still live.
    fn deliver(&self, cycle: u64, lines: Vec<String>) -> bool {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(cycle) {
            return false;
        }
        for line in lines {
            debug!("Received: {}", line);
            self.emit(ConnectionEvent::Message(line));
        }
        true
    }

    fn report_if_current(&self, cycle: u64, error: LinkError) {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.is_current(cycle) {
            self.emit(ConnectionEvent::Error(error));
        }
    }

    async fn read_loop(self: Arc<Self>, cycle: u64, mut reader: ReadHalf<Link>) {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let mut reassembler = LineReassembler::new();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    if self.shut_down(Some(cycle), None) {
                        info!("Link closed by feeder");
                    }
                    break;
                }
                Ok(n) => {
                    let lines = reassembler.push(&buf[..n]);
                    if !self.deliver(cycle, lines) {
                        break;
                    }
                }
                Err(e) => {
                    let cause = LinkError::UnexpectedLinkLoss(e.to_string());
                    if self.shut_down(Some(cycle), Some(cause)) {
                        error!("Connection lost: {}", e);
                    } else {
                        debug!("Read ended after disconnect: {}", e);
                    }
                    break;
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        cycle: u64,
        mut writer: WriteHalf<Link>,
        mut frames: mpsc::Receiver<OutboundFrame>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut failures = 0u32;

        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut stop => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let result = async {
                writer.write_all(&frame.bytes).await?;
                writer.flush().await
            }
            .await;

            match result {
                Ok(()) => {
                    failures = 0;
                    debug!("Sent {}", frame.what);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Failed to send {} ({} in a row): {}", frame.what, failures, e);
                    let error = LinkError::SendFailed {
                        what: frame.what,
                        cause: e.to_string(),
                    };

                    let limit = self.config.max_write_failures;
                    if limit > 0 && failures >= limit {
                        error!("{} consecutive write failures, dropping link", failures);
                        self.shut_down(Some(cycle), Some(error));
                    } else {
                        self.report_if_current(cycle, error);
                    }
                }
            }
        }

        if let Err(e) = writer.shutdown().await {
            warn!("Error closing write stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::error::ConnectError;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

    enum Script {
        Link(Link),
        Denied,
        Refused,
        Hang,
    }

    struct MockPlatform {
        script: parking_lot::Mutex<VecDeque<Script>>,
    }

    impl MockPlatform {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: parking_lot::Mutex::new(script.into()),
            }
        }
    }

    impl PlatformConnector for MockPlatform {
        async fn connect(&self, _address: DeviceAddress) -> Result<Link, ConnectError> {
            let next = self.script.lock().pop_front();
            match next {
                Some(Script::Link(link)) => Ok(link),
                Some(Script::Denied) => Err(ConnectError::PermissionDenied("denied".to_string())),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Refused) | None => {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into())
                }
            }
        }
    }

    /// Stream whose reads fail or never complete, and whose writes may fail.
    struct BrokenStream {
        read_fails: bool,
        write_fails: bool,
    }

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.read_fails {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            } else {
                Poll::Pending
            }
        }
    }

    impl AsyncWrite for BrokenStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.write_fails {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
            } else {
                Poll::Ready(Ok(buf.len()))
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Stream that takes a while to shut down and flags when it is dropped.
    struct SlowCloseStream {
        close_delay: Option<Pin<Box<tokio::time::Sleep>>>,
        released: Arc<AtomicBool>,
    }

    impl AsyncRead for SlowCloseStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for SlowCloseStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let delay = self.get_mut().close_delay.get_or_insert_with(|| {
                Box::pin(tokio::time::sleep(Duration::from_millis(200)))
            });
            delay.as_mut().poll(cx).map(Ok)
        }
    }

    impl Drop for SlowCloseStream {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Hands out queued links and notes whether the first one was gone yet.
    struct ReleaseCheckingPlatform {
        links: parking_lot::Mutex<VecDeque<Link>>,
        released: Arc<AtomicBool>,
        seen: parking_lot::Mutex<Vec<bool>>,
    }

    impl PlatformConnector for ReleaseCheckingPlatform {
        async fn connect(&self, _address: DeviceAddress) -> Result<Link, ConnectError> {
            self.seen.lock().push(self.released.load(Ordering::SeqCst));
            let link = self.links.lock().pop_front();
            link.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into())
        }
    }

    fn address() -> DeviceAddress {
        DeviceAddress::parse("B8:27:EB:67:07:B9").unwrap()
    }

    fn duplex_link() -> (Script, DuplexStream) {
        let (ours, peer) = tokio::io::duplex(1024);
        (Script::Link(Box::new(ours)), peer)
    }

    fn manager(
        script: Vec<Script>,
        config: LinkConfig,
    ) -> (
        ConnectionManager<MockPlatform>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        ConnectionManager::new(MockPlatform::new(script), config)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) {
        if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await {
            panic!("unexpected event: {:?}", event);
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use ConnectionState::*;
        let all = [Idle, Connecting, Connected, Disconnecting];
        let legal = [
            (Idle, Connecting),
            (Connecting, Connected),
            (Connecting, Idle),
            (Connecting, Disconnecting),
            (Connected, Disconnecting),
            (Disconnecting, Idle),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[tokio::test]
    async fn test_connect_emits_connected() {
        let (link, _peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.connect(address()), ConnectRequest::Started);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.address(), Some(address()));
    }

    #[tokio::test]
    async fn test_empty_schedule_then_peer_close() {
        let (link, mut peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.send_schedule(&[]).unwrap();
        let expected = b"{\"schedules\":[]}\n";
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(peer);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_quiet(&mut events).await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_while_idle_fails() {
        let (manager, mut events) = manager(vec![], LinkConfig::default());

        assert_eq!(
            manager.send_command(FeederCommand::Test),
            Err(LinkError::NotConnected)
        );
        assert_eq!(manager.send_schedule(&[]), Err(LinkError::NotConnected));
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_caller_disconnect_is_not_an_error() {
        let (link, mut peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

        // The peer sees the stream close.
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        assert_quiet(&mut events).await;
        assert_eq!(
            manager.send_command(FeederCommand::Test),
            Err(LinkError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (link, _peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        manager.disconnect();
        assert_quiet(&mut events).await;

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.disconnect();
        manager.disconnect();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_second_connect_is_ignored() {
        let (link, _peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        assert_eq!(manager.connect(address()), ConnectRequest::Started);
        assert_eq!(
            manager.connect(address()),
            ConnectRequest::AlreadyActive(ConnectionState::Connecting)
        );
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(
            manager.connect(address()),
            ConnectRequest::AlreadyActive(ConnectionState::Connected)
        );
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle() {
        let (manager, mut events) = manager(vec![Script::Refused], LinkConfig::default());

        manager.connect(address());
        match next_event(&mut events).await {
            ConnectionEvent::Error(LinkError::ConnectFailed(cause)) => {
                assert!(cause.contains("refused"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let (manager, mut events) = manager(vec![Script::Denied], LinkConfig::default());

        manager.connect(address());
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Error(LinkError::PermissionDenied(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let config = LinkConfig {
            connect_timeout: Duration::from_millis(50),
            ..LinkConfig::default()
        };
        let (manager, mut events) = manager(vec![Script::Hang], config);

        manager.connect(address());
        match next_event(&mut events).await {
            ConnectionEvent::Error(LinkError::ConnectFailed(cause)) => {
                assert!(cause.contains("timed out"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_connect() {
        let (link, _peer) = duplex_link();
        let (manager, mut events) = manager(vec![Script::Hang, link], LinkConfig::default());

        manager.connect(address());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        // Let the attempt reach the platform before cancelling it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

        assert_eq!(manager.connect(address()), ConnectRequest::Started);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    }

    #[tokio::test]
    async fn test_split_messages_are_reassembled() {
        let (link, mut peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        peer.write_all(b"ABC\nDEF").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Message("ABC".to_string())
        );
        peer.write_all(b"GH\n").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Message("DEFGH".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_messages_after_disconnect() {
        let (link, mut peer) = duplex_link();
        let (manager, mut events) = manager(vec![link], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.disconnect();
        let _ = peer.write_all(b"LATE\n").await;
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (link, mut peer) = duplex_link();
        let config = LinkConfig {
            send_queue_depth: 64,
            ..LinkConfig::default()
        };
        let (manager, mut events) = manager(vec![link], config);

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        let tokens: Vec<String> = (0..32)
            .map(|i| format!("CMD{:02}_{}", i, "X".repeat(200)))
            .collect();

        let mut tasks = Vec::new();
        for token in tokens.clone() {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move { manager.send_raw(&token) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let total: usize = tokens.iter().map(|t| t.len() + 1).sum();
        let mut received = vec![0u8; total];
        peer.read_exact(&mut received).await.unwrap();

        let text = String::from_utf8(received).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        let mut expected: Vec<&str> = tokens.iter().map(String::as_str).collect();
        expected.sort();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_read_error_reports_link_loss() {
        let stream = BrokenStream {
            read_fails: true,
            write_fails: false,
        };
        let (manager, mut events) =
            manager(vec![Script::Link(Box::new(stream))], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Error(LinkError::UnexpectedLinkLoss(_))
        ));
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_write_failure_keeps_link() {
        let stream = BrokenStream {
            read_fails: false,
            write_fails: true,
        };
        let config = LinkConfig {
            max_write_failures: 0,
            ..LinkConfig::default()
        };
        let (manager, mut events) = manager(vec![Script::Link(Box::new(stream))], config);

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.send_command(FeederCommand::FeedNow).unwrap();
        match next_event(&mut events).await {
            ConnectionEvent::Error(LinkError::SendFailed { what, .. }) => {
                assert_eq!(what, "command FEED_NOW")
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_quiet(&mut events).await;
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_repeated_write_failures_force_disconnect() {
        let stream = BrokenStream {
            read_fails: false,
            write_fails: true,
        };
        let config = LinkConfig {
            max_write_failures: 3,
            ..LinkConfig::default()
        };
        let (manager, mut events) = manager(vec![Script::Link(Box::new(stream))], config);

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        for _ in 0..3 {
            manager.send_command(FeederCommand::Test).unwrap();
        }
        for _ in 0..3 {
            assert!(matches!(
                next_event(&mut events).await,
                ConnectionEvent::Error(LinkError::SendFailed { .. })
            ));
        }
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (first, _first_peer) = duplex_link();
        let (second, mut second_peer) = duplex_link();
        let (manager, mut events) = manager(vec![first, second], LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        manager.disconnect();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        manager.send_command(FeederCommand::Test).unwrap();
        let mut buf = [0u8; 5];
        second_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"TEST\n");
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_previous_link_release() {
        let released = Arc::new(AtomicBool::new(false));
        let first: Link = Box::new(SlowCloseStream {
            close_delay: None,
            released: Arc::clone(&released),
        });
        let (second, _second_peer) = tokio::io::duplex(1024);
        let second: Link = Box::new(second);

        let platform = ReleaseCheckingPlatform {
            links: parking_lot::Mutex::new(VecDeque::from(vec![first, second])),
            released: Arc::clone(&released),
            seen: parking_lot::Mutex::new(Vec::new()),
        };
        let (manager, mut events) = ConnectionManager::new(platform, LinkConfig::default());

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        manager.disconnect();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert!(!released.load(Ordering::SeqCst));

        manager.connect(address());
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(*manager.platform().seen.lock(), vec![false, true]);
    }
}
