use super::{Command, SupervisorNotice, SupervisorStatus};
use crate::channels::{ChannelMessage, PushMessage, RpcClient};
use crate::config::PeerLinkConfig;
use crate::peer::{
    ConnectionId, ConnectionState, Heartbeat, PeerConnection, PeerEvent, ReconnectPolicy, Role,
    TransportEvent, TransportFactory,
};
use crate::signaling::{GoodbyeReason, GuestSignaling, SignalMessage, SignalSubscription};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Identity of the remote side as seen by a guest
const HOST_PEER: &str = "host";

struct Attempt {
    user: String,
    peer: Arc<PeerConnection>,
    client: Arc<RpcClient>,
    subscription: Option<SignalSubscription<SignalMessage>>,
}

enum Wake {
    Command(Option<Command>),
    Peer(PeerEvent),
    Signal(Option<Result<SignalMessage>>),
    HeartbeatFailed(ConnectionId, Error),
    RetryDue,
    Deadline,
}

pub(super) struct SupervisorActor {
    config: PeerLinkConfig,
    signaling: Arc<dyn GuestSignaling>,
    factory: Arc<dyn TransportFactory>,

    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    heartbeat_tx: mpsc::UnboundedSender<(ConnectionId, Error)>,
    heartbeat_rx: mpsc::UnboundedReceiver<(ConnectionId, Error)>,

    status_tx: watch::Sender<SupervisorStatus>,
    notices: broadcast::Sender<SupervisorNotice>,
    pushes: broadcast::Sender<PushMessage>,
    client_slot: Arc<RwLock<Option<Arc<RpcClient>>>>,

    policy: ReconnectPolicy,
    heartbeat: Heartbeat,
    attempt: Option<Attempt>,
    current_user: Option<String>,
    state: ConnectionState,
    connecting: bool,
    last_error: Option<String>,
    trouble_notified: bool,
    retry_at: Option<Instant>,
    deadline: Option<Instant>,
}

async fn next_signal(attempt: &mut Option<Attempt>) -> Option<Result<SignalMessage>> {
    match attempt.as_mut().and_then(|a| a.subscription.as_mut()) {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SupervisorActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: PeerLinkConfig,
        signaling: Arc<dyn GuestSignaling>,
        factory: Arc<dyn TransportFactory>,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<SupervisorStatus>,
        notices: broadcast::Sender<SupervisorNotice>,
        pushes: broadcast::Sender<PushMessage>,
        client_slot: Arc<RwLock<Option<Arc<RpcClient>>>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::new(&config.reconnect);

        Self {
            config,
            signaling,
            factory,
            commands,
            events_tx,
            events_rx,
            heartbeat_tx,
            heartbeat_rx,
            status_tx,
            notices,
            pushes,
            client_slot,
            policy,
            heartbeat: Heartbeat::new(),
            attempt: None,
            current_user: None,
            state: ConnectionState::New,
            connecting: false,
            last_error: None,
            trouble_notified: false,
            retry_at: None,
            deadline: None,
        }
    }

    #[instrument(name = "supervisor", skip(self))]
    pub(super) async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(event) = self.events_rx.recv() => Wake::Peer(event),
                signal = next_signal(&mut self.attempt) => Wake::Signal(signal),
                Some((id, error)) = self.heartbeat_rx.recv() => Wake::HeartbeatFailed(id, error),
                _ = sleep_until(self.retry_at) => Wake::RetryDue,
                _ = sleep_until(self.deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Wake::Command(None) => {
                    debug!("All supervisor handles dropped");
                    self.teardown().await;
                    break;
                }
                Wake::Peer(event) => self.handle_peer_event(event).await,
                Wake::Signal(signal) => self.handle_signal(signal).await,
                Wake::HeartbeatFailed(id, error) => {
                    if self.is_current(id) {
                        self.fail_attempt(error).await;
                    }
                }
                Wake::RetryDue => self.handle_retry().await,
                Wake::Deadline => {
                    self.deadline = None;
                    if self.state != ConnectionState::Connected {
                        self.fail_attempt(Error::OperationTimeout(format!(
                            "connection timeout after {}ms",
                            self.config.connection_timeout_ms
                        )))
                        .await;
                    }
                }
            }
        }

        info!("Connection supervisor stopped");
    }

    /// Returns false when the actor should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { user } => {
                info!("Starting connection lifecycle for {}", user);
                self.current_user = Some(user.clone());
                self.policy.reset();
                self.trouble_notified = false;
                self.retry_at = None;
                self.connect(user).await;
            }
            Command::Connect { user, done } => {
                self.connect(user).await;
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Stop { done } => {
                self.stop().await;
                let _ = done.send(());
            }
            Command::Shutdown { done } => {
                self.stop().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|a| a.peer.connection_id() == id)
    }

    fn channel_ready(&self) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|a| a.peer.is_channel_open())
    }

    fn publish(&self) {
        self.status_tx.send_replace(SupervisorStatus {
            state: self.state,
            channel_ready: self.channel_ready(),
            connecting: self.connecting,
            attempts: self.policy.attempts(),
            retry_pending: self.retry_at.is_some(),
            last_error: self.last_error.clone(),
            active_user: self.current_user.clone(),
        });
    }

    async fn connect(&mut self, user: String) {
        if self.connecting {
            debug!("Connect ignored: attempt already in flight");
            return;
        }
        if self.state == ConnectionState::Connected && self.channel_ready() {
            debug!("Connect ignored: already connected");
            return;
        }

        self.connecting = true;
        self.teardown().await;
        self.state = ConnectionState::Connecting;
        self.deadline = Some(Instant::now() + self.config.connection_timeout());
        self.publish();

        if let Err(e) = self.establish(user).await {
            self.fail_attempt(e).await;
        }
    }

    /// Create the connection, subscribe, then send the offer
    async fn establish(&mut self, user: String) -> Result<()> {
        let peer = Arc::new(
            PeerConnection::new(
                Role::Guest,
                HOST_PEER.to_string(),
                &self.config.channels,
                self.factory.as_ref(),
                self.events_tx.clone(),
            )
            .await?,
        );
        let client = Arc::new(RpcClient::new(
            Arc::clone(&peer),
            self.config.rpc_timeout(),
        ));
        self.attempt = Some(Attempt {
            user: user.clone(),
            peer: Arc::clone(&peer),
            client,
            subscription: None,
        });

        // Subscribe before the offer goes out so the answer cannot be missed
        let subscription = self.signaling.subscribe_as_guest().await?;
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.subscription = Some(subscription);
        }

        let offer = peer.create_offer().await?;
        self.signaling
            .send_signal(SignalMessage::offer(offer, user))
            .await?;

        debug!("Offer sent on {}", peer.connection_id());
        Ok(())
    }

    /// Close the current attempt; idempotent
    async fn teardown(&mut self) {
        self.heartbeat.stop();
        self.deadline = None;
        *self.client_slot.write() = None;

        if let Some(attempt) = self.attempt.take() {
            if let Some(subscription) = &attempt.subscription {
                subscription.abort();
            }
            attempt.client.fail_all();
            attempt.peer.close().await;
            debug!("Tore down attempt {}", attempt.peer.connection_id());
        }
    }

    async fn fail_attempt(&mut self, error: Error) {
        warn!("Connection attempt failed: {}", error);
        self.teardown().await;
        self.state = ConnectionState::Failed;
        self.connecting = false;
        self.last_error = Some(error.to_string());
        self.publish();
        self.schedule_retry();
    }

    async fn disconnect(&mut self) {
        self.teardown().await;
        self.state = ConnectionState::New;
        self.connecting = false;
        self.retry_at = None;
        self.publish();
    }

    async fn stop(&mut self) {
        if self.state == ConnectionState::Connected {
            if let Some(user) = self.current_user.clone() {
                let goodbye = SignalMessage::goodbye(user, GoodbyeReason::UserLeft);
                if let Err(e) = self.signaling.send_signal(goodbye).await {
                    warn!("Failed to send goodbye: {}", e);
                }
            }
        }
        self.current_user = None;
        self.disconnect().await;
        info!("Connection lifecycle stopped");
    }

    /// Arm the retry timer if the lifecycle is still wanted
    fn schedule_retry(&mut self) {
        if self.current_user.is_none() || self.connecting || self.retry_at.is_some() {
            return;
        }

        let delay = self.policy.next_delay();
        if self.policy.should_notify() && !self.trouble_notified {
            self.trouble_notified = true;
            let _ = self.notices.send(SupervisorNotice::ConnectionTrouble {
                attempts: self.policy.attempts(),
            });
        }

        info!(
            "Reconnecting in {:?} (retry {})",
            delay,
            self.policy.attempts() + 1
        );
        self.retry_at = Some(Instant::now() + delay);
        self.publish();
    }

    async fn handle_retry(&mut self) {
        self.retry_at = None;
        let Some(user) = self.current_user.clone() else {
            return;
        };
        if self.connecting {
            return;
        }

        self.policy.record_attempt();
        self.connect(user).await;
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        if !self.is_current(event.connection_id) {
            trace!("Ignoring event from stale connection {}", event.connection_id);
            return;
        }

        match event.event {
            TransportEvent::StateChanged(state) => self.handle_state(state).await,
            TransportEvent::CandidateDiscovered(candidate) => {
                let Some(user) = self.attempt.as_ref().map(|a| a.user.clone()) else {
                    return;
                };
                let message = SignalMessage::ice_candidate(candidate, user, None);
                if let Err(e) = self.signaling.send_signal(message).await {
                    debug!("Failed to send candidate: {}", e);
                }
            }
            TransportEvent::ChannelOpen => {
                info!("Data channel open");
                self.activate_link();
            }
            TransportEvent::ChannelClosed => self.handle_channel_closed().await,
            TransportEvent::MessageReceived(text) => self.handle_message(&text),
        }
    }

    async fn handle_state(&mut self, state: ConnectionState) {
        debug!("Transport state: {:?}", state);
        let previous = std::mem::replace(&mut self.state, state);

        match state {
            ConnectionState::Connected => {
                info!("Connected to host");
                self.connecting = false;
                self.deadline = None;
                self.retry_at = None;
                self.last_error = None;
                self.trouble_notified = false;
                self.policy.reset();
                self.heartbeat.reset();

                // Back from a path blip
                if previous == ConnectionState::Disconnected {
                    if self.channel_ready() {
                        info!("Path recovered with the data channel still open");
                        self.activate_link();
                    } else {
                        self.fail_attempt(Error::ConnectionClosed(
                            "path recovered without a data channel".to_string(),
                        ))
                        .await;
                    }
                    return;
                }
                self.publish();
            }
            state if state.is_retry_trigger() => {
                warn!("Connection lost: {:?}", state);
                self.connecting = false;
                self.deadline = None;
                self.heartbeat.stop();
                *self.client_slot.write() = None;
                if let Some(attempt) = &self.attempt {
                    attempt.client.fail_all();
                }
                self.publish();
                self.schedule_retry();
            }
            _ => self.publish(),
        }
    }

    /// A closed channel on a connected transport is a dead link
    async fn handle_channel_closed(&mut self) {
        if self.state == ConnectionState::Connected {
            self.fail_attempt(Error::ConnectionClosed(
                "data channel closed while the transport stayed connected".to_string(),
            ))
            .await;
            return;
        }

        debug!("Data channel closed");
        self.heartbeat.stop();
        *self.client_slot.write() = None;
        self.publish();
    }

    /// Publish the client and start the heartbeat for the open channel
    fn activate_link(&mut self) {
        let Some(attempt) = &self.attempt else {
            return;
        };

        let client = Arc::clone(&attempt.client);
        *self.client_slot.write() = Some(Arc::clone(&client));

        let id = attempt.peer.connection_id();
        let failures = self.heartbeat_tx.clone();
        self.heartbeat.start(
            move || {
                let client = Arc::clone(&client);
                async move { client.ping().await }
            },
            self.config.heartbeat.interval(),
            self.config.heartbeat.timeout(),
            move |error| {
                let _ = failures.send((id, error));
            },
        );
        self.publish();
    }

    fn handle_message(&mut self, text: &str) {
        let message = match ChannelMessage::from_text(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed channel message: {}", e);
                return;
            }
        };

        match message {
            ChannelMessage::Response { id, reply } => {
                if let Some(attempt) = &self.attempt {
                    attempt.client.handle_response(id, reply);
                }
            }
            ChannelMessage::Push(push) => {
                // No subscribers is fine
                let _ = self.pushes.send(push);
            }
            ChannelMessage::Request { id, call } => {
                debug!("Guest ignores {} request {}", call.method(), id);
            }
        }
    }

    async fn handle_signal(&mut self, signal: Option<Result<SignalMessage>>) {
        match signal {
            None => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.subscription = None;
                }
                if self.state == ConnectionState::Connected {
                    info!("Signaling stream ended after connect");
                } else {
                    self.fail_attempt(Error::SignalingError(
                        "signaling stream ended before connect".to_string(),
                    ))
                    .await;
                }
            }
            Some(Err(e)) => self.fail_attempt(e).await,
            Some(Ok(message)) => self.handle_signal_message(message).await,
        }
    }

    async fn handle_signal_message(&mut self, message: SignalMessage) {
        let Some(peer) = self.attempt.as_ref().map(|a| Arc::clone(&a.peer)) else {
            return;
        };

        match message {
            SignalMessage::Answer { sdp, .. } => {
                if let Err(e) = peer.apply_answer(&sdp).await {
                    self.fail_attempt(e).await;
                }
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                peer.add_remote_candidate(candidate).await;
            }
            SignalMessage::Goodbye { reason, .. } => {
                info!("Host said goodbye: {:?}", reason);
                self.current_user = None;
                self.disconnect().await;
            }
            SignalMessage::Offer { from, .. } => {
                warn!("Guest ignores offer from {}", from);
            }
        }
    }
}
