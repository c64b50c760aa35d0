use crate::relay_core::error_handler::ExponentialBackoff;
use crate::relay_core::event_source::{EventSource, TransportError};
use crate::relay_core::types::{
    close_frame, parse_relay_message, req_frame, RawEvent, RelayMessage, SubscriptionFilter,
};
use crate::short_id;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct RelayPoolConfig {
    pub connect_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_retries: u32,
    /// Event ids remembered for cross-relay dedup.
    pub dedup_capacity: usize,
    pub close_timeout: Duration,
}

impl Default for RelayPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_max_retries: 10,
            dedup_capacity: 10_000,
            close_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
enum RelayCommand {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

struct RelayHandle {
    url: String,
    commands: mpsc::UnboundedSender<RelayCommand>,
    task: JoinHandle<()>,
}

/// Bounded memory of recently seen event ids.
///
/// The same event usually arrives once per relay; only the first copy is
/// handed to the loop.
#[derive(Debug)]
pub struct SeenEvents {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns true the first time an id is seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Nostr relay client over WebSockets.
///
/// Each relay runs in its own task that forwards `EVENT` frames into a shared
/// buffer, reconnects with exponential backoff and replays the active `REQ`
/// after a reconnect. When every relay task has given up the buffer closes
/// and `drain` reports [`TransportError::StreamClosed`].
pub struct RelayPool {
    config: RelayPoolConfig,
    relays: Vec<RelayHandle>,
    events_rx: Option<mpsc::UnboundedReceiver<RawEvent>>,
    seen: SeenEvents,
    subscription_id: Option<String>,
}

impl RelayPool {
    pub fn new(config: RelayPoolConfig) -> Self {
        let seen = SeenEvents::new(config.dedup_capacity);
        Self {
            config,
            relays: Vec::new(),
            events_rx: None,
            seen,
            subscription_id: None,
        }
    }

    pub fn connected_relays(&self) -> Vec<&str> {
        self.relays
            .iter()
            .filter(|relay| !relay.task.is_finished())
            .map(|relay| relay.url.as_str())
            .collect()
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(RelayPoolConfig::default())
    }
}

#[async_trait]
impl EventSource for RelayPool {
    async fn connect(&mut self, endpoints: &[String]) -> Result<usize, TransportError> {
        if endpoints.is_empty() {
            return Err(TransportError::NoEndpoints);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        for url in endpoints {
            match timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
                Ok(Ok((ws, _response))) => {
                    log::info!("✅ Connected to relay: {}", url);
                    let (commands, commands_rx) = mpsc::unbounded_channel();
                    let task = tokio::spawn(run_relay(
                        url.clone(),
                        ws,
                        commands_rx,
                        events_tx.clone(),
                        self.config.clone(),
                    ));
                    self.relays.push(RelayHandle {
                        url: url.clone(),
                        commands,
                        task,
                    });
                }
                Ok(Err(e)) => log::error!("❌ Failed to connect to relay {}: {}", url, e),
                Err(_) => log::error!(
                    "❌ Timed out connecting to relay {} after {:?}",
                    url,
                    self.config.connect_timeout
                ),
            }
        }

        if self.relays.is_empty() {
            return Err(TransportError::NoEndpointReachable {
                attempted: endpoints.len(),
            });
        }

        self.events_rx = Some(events_rx);
        Ok(self.relays.len())
    }

    async fn subscribe(&mut self, filter: &SubscriptionFilter) -> Result<String, TransportError> {
        let subscription_id = format!("autozap-{}", hex::encode(rand::random::<[u8; 8]>()));
        let frame = req_frame(&subscription_id, filter);

        let mut delivered = 0;
        for relay in &self.relays {
            match relay.commands.send(RelayCommand::Subscribe(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => log::warn!("⚠️  Relay {} is gone, subscription not sent", relay.url),
            }
        }

        if delivered == 0 {
            return Err(TransportError::NotConnected);
        }

        log::info!(
            "📡 Monitoring reactions to note {}... on {} relays (subscription: {})",
            short_id(&filter.target_post_id),
            delivered,
            subscription_id
        );
        self.subscription_id = Some(subscription_id.clone());
        Ok(subscription_id)
    }

    async fn drain(&mut self) -> Result<Vec<RawEvent>, TransportError> {
        let rx = self.events_rx.as_mut().ok_or(TransportError::NotConnected)?;

        let mut batch = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    // Id-less events pass through so the filter can reject them by name.
                    if event.id.is_empty() || self.seen.insert(&event.id) {
                        batch.push(event);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if batch.is_empty() {
                        return Err(TransportError::StreamClosed(
                            "every relay exhausted its reconnect attempts".to_string(),
                        ));
                    }
                    break;
                }
            }
        }

        Ok(batch)
    }

    async fn close(&mut self) {
        let unsubscribe = self.subscription_id.take().map(|id| close_frame(&id));

        for relay in &self.relays {
            if let Some(frame) = &unsubscribe {
                let _ = relay.commands.send(RelayCommand::Unsubscribe(frame.clone()));
            }
            let _ = relay.commands.send(RelayCommand::Shutdown);
        }

        for relay in self.relays.drain(..) {
            let abort = relay.task.abort_handle();
            if timeout(self.config.close_timeout, relay.task).await.is_err() {
                log::warn!("⚠️  Relay {} did not close in time, aborting", relay.url);
                abort.abort();
            }
        }

        self.events_rx = None;
        log::info!("✅ Closed relay connections");
    }

    fn source_type(&self) -> &'static str {
        "Nostr relays"
    }
}

enum PumpExit {
    Shutdown,
    Disconnected(String),
}

async fn run_relay(
    url: String,
    mut ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<RelayCommand>,
    events: mpsc::UnboundedSender<RawEvent>,
    config: RelayPoolConfig,
) {
    let mut active_req: Option<String> = None;
    let mut backoff = ExponentialBackoff::new(
        config.reconnect_initial_delay,
        config.reconnect_max_delay,
        config.reconnect_max_retries,
    );

    loop {
        match pump(&url, &mut ws, &mut commands, &events, &mut active_req).await {
            PumpExit::Shutdown => {
                let _ = ws.close(None).await;
                log::debug!("Relay task for {} stopped", url);
                return;
            }
            PumpExit::Disconnected(reason) => {
                log::warn!("⚠️  Lost relay {}: {}", url, reason);
                match reconnect(&url, &config, &mut backoff, active_req.as_deref()).await {
                    Some(stream) => ws = stream,
                    None => {
                        log::error!("❌ Giving up on relay {} after {} attempts", url, backoff.attempts());
                        return;
                    }
                }
            }
        }
    }
}

async fn pump(
    url: &str,
    ws: &mut WsStream,
    commands: &mut mpsc::UnboundedReceiver<RelayCommand>,
    events: &mpsc::UnboundedSender<RawEvent>,
    active_req: &mut Option<String>,
) -> PumpExit {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let frame = match command {
                    Some(RelayCommand::Subscribe(frame)) => {
                        *active_req = Some(frame.clone());
                        frame
                    }
                    Some(RelayCommand::Unsubscribe(frame)) => {
                        *active_req = None;
                        frame
                    }
                    Some(RelayCommand::Shutdown) | None => return PumpExit::Shutdown,
                };
                if let Err(e) = ws.send(Message::Text(frame)).await {
                    return PumpExit::Disconnected(format!("send failed: {}", e));
                }
            }

            message = ws.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_frame(url, &text, events) {
                            return PumpExit::Shutdown;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return PumpExit::Disconnected(format!("closed by relay {}", reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Disconnected(e.to_string()),
                    None => return PumpExit::Disconnected("stream ended".to_string()),
                }
            }
        }
    }
}

/// Returns false once nobody is listening for events anymore.
fn handle_frame(url: &str, text: &str, events: &mpsc::UnboundedSender<RawEvent>) -> bool {
    match parse_relay_message(text) {
        Some(RelayMessage::Event { event, .. }) => events.send(event).is_ok(),
        Some(RelayMessage::MalformedEvent { subscription_id, reason }) => {
            log::warn!("⚠️  Dropping undecodable event from {} ({}): {}", url, subscription_id, reason);
            true
        }
        Some(RelayMessage::EndOfStoredEvents { subscription_id }) => {
            log::debug!("{} finished stored events for {}", url, subscription_id);
            true
        }
        Some(RelayMessage::Notice(notice)) => {
            log::warn!("⚠️  NOTICE from {}: {}", url, notice);
            true
        }
        Some(RelayMessage::Closed { subscription_id, reason }) => {
            log::warn!("⚠️  {} closed subscription {}: {}", url, subscription_id, reason);
            true
        }
        Some(RelayMessage::Ok { .. }) => true,
        None => {
            log::debug!("Ignoring unparseable frame from {}: {}", url, text);
            true
        }
    }
}

async fn reconnect(
    url: &str,
    config: &RelayPoolConfig,
    backoff: &mut ExponentialBackoff,
    active_req: Option<&str>,
) -> Option<WsStream> {
    loop {
        backoff.sleep().await.ok()?;

        match timeout(config.connect_timeout, connect_async(url)).await {
            Ok(Ok((mut ws, _response))) => {
                if let Some(frame) = active_req {
                    if let Err(e) = ws.send(Message::Text(frame.to_string())).await {
                        log::warn!("⚠️  Resubscribe on {} failed: {}", url, e);
                        continue;
                    }
                }
                log::info!("✅ Reconnected to relay: {}", url);
                backoff.reset();
                return Some(ws);
            }
            Ok(Err(e)) => log::warn!("⚠️  Reconnect to {} failed: {}", url, e),
            Err(_) => log::warn!("⚠️  Reconnect to {} timed out", url),
        }
    }
}
