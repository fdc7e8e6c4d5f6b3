use super::registry::GuestRegistry;
use super::router::{dispatch, GameRouter};
use super::{HostCommand, HostEvent, LeaveReason};
use crate::channels::ChannelMessage;
use crate::config::PeerLinkConfig;
use crate::peer::{
    ConnectionId, ConnectionState, PeerConnection, PeerEvent, Role, TransportEvent,
    TransportFactory,
};
use crate::signaling::{GoodbyeReason, HostSignal, HostSignaling, SignalMessage, SignalSubscription};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, trace, warn};

enum Wake {
    Command(Option<HostCommand>),
    Peer(PeerEvent),
    Signal(Option<Result<HostSignal>>),
}

pub(super) struct FanoutActor {
    config: PeerLinkConfig,
    host_id: String,
    signaling: Arc<dyn HostSignaling>,
    factory: Arc<dyn TransportFactory>,
    router: Arc<dyn GameRouter>,
    registry: GuestRegistry,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    host_events: broadcast::Sender<HostEvent>,
    subscription: Option<SignalSubscription<HostSignal>>,
}

async fn next_signal(
    subscription: &mut Option<SignalSubscription<HostSignal>>,
) -> Option<Result<HostSignal>> {
    match subscription.as_mut() {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Answer `offer` and send the answer back to the guest
///
/// Takes the actor's parts instead of `&self`: the actor is `Send` but not
/// `Sync`, so a shared borrow of it cannot live across an await.
async fn answer(
    signaling: &dyn HostSignaling,
    host_id: &str,
    guest_id: &str,
    peer: &PeerConnection,
    offer: &str,
) -> Result<()> {
    let answer = peer.create_answer(offer).await?;
    signaling
        .send_signal(
            SignalMessage::answer(answer, host_id.to_string(), guest_id),
            guest_id,
        )
        .await
}

impl FanoutActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: PeerLinkConfig,
        host_id: String,
        signaling: Arc<dyn HostSignaling>,
        factory: Arc<dyn TransportFactory>,
        router: Arc<dyn GameRouter>,
        registry: GuestRegistry,
        commands: mpsc::UnboundedReceiver<HostCommand>,
        host_events: broadcast::Sender<HostEvent>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            host_id,
            signaling,
            factory,
            router,
            registry,
            commands,
            events_tx,
            events_rx,
            host_events,
            subscription: None,
        }
    }

    #[instrument(name = "host_fanout", skip(self), fields(host_id = %self.host_id))]
    pub(super) async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(event) = self.events_rx.recv() => Wake::Peer(event),
                signal = next_signal(&mut self.subscription) => Wake::Signal(signal),
            };

            match wake {
                Wake::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Wake::Command(None) => {
                    self.stop().await;
                    break;
                }
                Wake::Peer(event) => self.handle_peer_event(event).await,
                Wake::Signal(None) => {
                    warn!("Host signaling stream ended");
                    self.subscription = None;
                }
                Wake::Signal(Some(Err(e))) => {
                    warn!("Host signaling stream failed: {}", e);
                    self.subscription = None;
                }
                Wake::Signal(Some(Ok(signal))) => self.handle_signal(signal).await,
            }
        }

        info!("Host fanout stopped");
    }

    async fn handle_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::Start { done } => {
                let _ = done.send(self.start().await);
            }
            HostCommand::Stop { done } => {
                self.stop().await;
                let _ = done.send(());
            }
            HostCommand::CloseGuest { guest_id, done } => {
                let result = self.registry.remove(&guest_id).await;
                if result.is_ok() {
                    self.emit_left(&guest_id, LeaveReason::Closed);
                }
                let _ = done.send(result);
            }
            HostCommand::Shutdown { done } => {
                self.stop().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn start(&mut self) -> Result<()> {
        if self.subscription.is_some() {
            debug!("Host already listening");
            return Ok(());
        }
        self.subscription = Some(self.signaling.subscribe_as_host().await?);
        info!("Host listening for guests");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }

        for (guest_id, peer) in self.registry.peers().await {
            if peer.state() == ConnectionState::Connected {
                let goodbye = SignalMessage::goodbye(self.host_id.clone(), GoodbyeReason::LobbyClosed);
                if let Err(e) = self.signaling.send_signal(goodbye, &guest_id).await {
                    debug!("Goodbye to {} failed: {}", guest_id, e);
                }
            }
        }

        for guest_id in self.registry.clear().await {
            self.emit_left(&guest_id, LeaveReason::Closed);
        }
    }

    fn emit(&self, event: HostEvent) {
        // No subscribers is fine
        let _ = self.host_events.send(event);
    }

    fn emit_left(&self, guest_id: &str, reason: LeaveReason) {
        info!("Guest {} left: {:?}", guest_id, reason);
        self.emit(HostEvent::GuestLeft {
            guest_id: guest_id.to_string(),
            reason,
        });
    }

    async fn handle_signal(&mut self, signal: HostSignal) {
        let HostSignal { guest_id, message } = signal;
        trace!("{} from {}", message.kind(), guest_id);

        match message {
            SignalMessage::Offer { sdp, .. } => self.handle_offer(guest_id, &sdp).await,
            SignalMessage::IceCandidate { candidate, .. } => match self.registry.get(&guest_id).await {
                Ok(peer) => peer.add_remote_candidate(candidate).await,
                Err(_) => debug!("Candidate from unknown guest {}", guest_id),
            },
            SignalMessage::Answer { sdp, .. } => {
                if let Ok(peer) = self.registry.get(&guest_id).await {
                    if let Err(e) = peer.apply_answer(&sdp).await {
                        warn!("Rejected answer from {}: {}", guest_id, e);
                    }
                }
            }
            SignalMessage::Goodbye { reason, .. } => {
                if self.registry.remove(&guest_id).await.is_ok() {
                    self.emit_left(&guest_id, LeaveReason::Goodbye(reason));
                }
            }
        }
    }

    async fn handle_offer(&mut self, guest_id: String, sdp: &str) {
        let peer = match PeerConnection::new(
            Role::Host,
            guest_id.clone(),
            &self.config.channels,
            self.factory.as_ref(),
            self.events_tx.clone(),
        )
        .await
        {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                warn!("Failed to create connection for {}: {}", guest_id, e);
                return;
            }
        };

        if let Some(previous) = self.registry.insert(guest_id.clone(), Arc::clone(&peer)).await {
            info!("Replacing connection {} for {}", previous.connection_id(), guest_id);
            previous.close().await;
        }

        if let Err(e) = answer(self.signaling.as_ref(), &self.host_id, &guest_id, &peer, sdp).await {
            warn!("Negotiation with {} failed: {}", guest_id, e);
            if self
                .registry
                .remove_connection(&guest_id, peer.connection_id())
                .await
            {
                self.emit_left(&guest_id, LeaveReason::NegotiationFailed(e.to_string()));
            }
            return;
        }

        self.emit(HostEvent::GuestJoined { guest_id });
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            connection_id,
            event,
        } = event;
        let Some(guest_id) = self.registry.find_connection(connection_id).await else {
            trace!("Ignoring event from stale connection {}", connection_id);
            return;
        };

        match event {
            TransportEvent::StateChanged(state) => {
                self.handle_state(&guest_id, connection_id, state).await
            }
            TransportEvent::CandidateDiscovered(candidate) => {
                let message = SignalMessage::ice_candidate(
                    candidate,
                    self.host_id.clone(),
                    Some(guest_id.clone()),
                );
                if let Err(e) = self.signaling.send_signal(message, &guest_id).await {
                    debug!("Failed to send candidate to {}: {}", guest_id, e);
                }
            }
            TransportEvent::ChannelOpen => self.handle_channel_open(&guest_id).await,
            TransportEvent::ChannelClosed => debug!("Data channel to {} closed", guest_id),
            TransportEvent::MessageReceived(text) => self.handle_message(&guest_id, &text).await,
        }
    }

    async fn handle_state(
        &mut self,
        guest_id: &str,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) {
        debug!("Guest {} transport state: {:?}", guest_id, state);
        match state {
            ConnectionState::Connected => self.registry.mark_connected(guest_id).await,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed => {
                if self.registry.remove_connection(guest_id, connection_id).await {
                    self.emit_left(guest_id, LeaveReason::ConnectionLost(state));
                }
            }
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    async fn handle_channel_open(&mut self, guest_id: &str) {
        info!("Data channel to {} open", guest_id);
        self.emit(HostEvent::GuestReady {
            guest_id: guest_id.to_string(),
        });

        let songs = match self.router.list_songs().await {
            Ok(songs) => songs,
            Err(e) => {
                warn!("Could not load songs for {}: {}", guest_id, e);
                return;
            }
        };
        if let Ok(peer) = self.registry.get(guest_id).await {
            if !peer.send(&ChannelMessage::songs_push(songs)).await {
                warn!("Song push to {} failed", guest_id);
            }
        }
    }

    async fn handle_message(&mut self, guest_id: &str, text: &str) {
        self.registry.touch(guest_id).await;

        let (id, call) = match ChannelMessage::from_text(text) {
            Ok(ChannelMessage::Request { id, call }) => (id, call),
            Ok(other) => {
                debug!("Ignoring non-request message from {}: {:?}", guest_id, other);
                return;
            }
            Err(e) => {
                warn!("Malformed message from {}: {}", guest_id, e);
                return;
            }
        };

        let reply = dispatch(self.router.as_ref(), &call).await;
        let sent = match self.registry.get(guest_id).await {
            Ok(peer) => peer.send(&ChannelMessage::response(id, reply)).await,
            Err(_) => false,
        };
        if !sent {
            debug!("Response {} to {} not delivered", id, guest_id);
        }
    }
}
