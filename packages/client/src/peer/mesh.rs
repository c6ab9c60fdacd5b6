//! Peer-mesh lifecycle manager.
//!
//! Keeps one link per remote participant and owns every lifecycle concern:
//! who calls whom (glare rule), offer/answer/candidate handling, the
//! periodic health sweep, deduplicated delayed reconnects, foreground
//! recovery, and teardown. Transport specifics stay behind the traits in
//! [`super::transport`].
//!
//! Stale or duplicate handshake messages are logged and ignored rather
//! than treated as errors: with several links negotiating concurrently and
//! reconnects racing departures, they are expected traffic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use tandem_shared::protocol::{Participant, SignalKind, SignalPayload};

use crate::error::MediaError;

use super::link::{self, LinkPhase};
use super::transport::{
    IceConfig, LinkEvent, LocalMedia, MediaSource, PeerConnector, PeerLinkHandle,
    RemoteMediaStream, SessionDescription,
};

/// Tuning knobs of the mesh.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub ice: IceConfig,
    /// How often the health monitor scans all links.
    pub health_check_interval: Duration,
    /// Delay between observing a broken link and rebuilding it, so
    /// transient flaps don't cause reconnect storms.
    pub reconnect_delay: Duration,
    /// Pause between tearing a link down and re-running the call decision.
    pub teardown_settle: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            health_check_interval: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(2),
            teardown_settle: Duration::from_millis(500),
        }
    }
}

/// A handshake payload addressed to one remote participant, ready for the
/// signaling relay.
#[derive(Debug, Clone)]
pub struct OutboundSignal {
    pub to: String,
    pub payload: SignalPayload,
}

/// Notifications for the embedding UI (per-tile indicators).
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PhaseChanged {
        remote_id: String,
        phase: LinkPhase,
    },
    RemoteMedia {
        remote_id: String,
        stream: RemoteMediaStream,
    },
    LinkRemoved {
        remote_id: String,
    },
}

struct Link {
    handle: Arc<dyn PeerLinkHandle>,
    phase: LinkPhase,
}

struct MeshInner {
    local_id: String,
    config: MeshConfig,
    connector: Arc<dyn PeerConnector>,
    media_source: Arc<dyn MediaSource>,
    signals: mpsc::UnboundedSender<OutboundSignal>,
    events: mpsc::UnboundedSender<MeshEvent>,
    link_events: mpsc::UnboundedSender<LinkEvent>,
    links: Mutex<HashMap<String, Link>>,
    /// Duplicate-initiation guard: remote ids with a call underway.
    initiated: Mutex<HashSet<String>>,
    /// One pending reconnect timer per failing remote id.
    reconnect_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    media: Mutex<Option<LocalMedia>>,
}

/// The mesh manager. One per joined room.
pub struct MeshManager {
    inner: Arc<MeshInner>,
    health_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

impl MeshManager {
    /// Acquire local media and start the mesh tasks.
    ///
    /// A media-acquisition failure is returned to the caller: it is the one
    /// condition the UI surfaces as a blocking state with a manual retry.
    /// Outbound handshake payloads are written to `signals`; the caller
    /// forwards them through its room session.
    pub async fn start(
        local_id: impl Into<String>,
        connector: Arc<dyn PeerConnector>,
        media_source: Arc<dyn MediaSource>,
        config: MeshConfig,
        signals: mpsc::UnboundedSender<OutboundSignal>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>), MediaError> {
        let media = media_source.acquire().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_events_tx, mut link_events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(MeshInner {
            local_id: local_id.into(),
            config,
            connector,
            media_source,
            signals,
            events: events_tx,
            link_events: link_events_tx,
            links: Mutex::new(HashMap::new()),
            initiated: Mutex::new(HashSet::new()),
            reconnect_timers: Mutex::new(HashMap::new()),
            media: Mutex::new(Some(media)),
        });

        let pump_inner = inner.clone();
        let pump_task = tokio::spawn(async move {
            while let Some(event) = link_events_rx.recv().await {
                pump_inner.handle_link_event(event).await;
            }
        });

        let health_inner = inner.clone();
        let health_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_inner.config.health_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sweep_broken_links(&health_inner).await;
            }
        });

        Ok((
            Self {
                inner,
                health_task,
                pump_task,
            },
            events_rx,
        ))
    }

    /// Initial (and repeated) pass over the room roster: call everyone the
    /// glare rule says we should call, and forget initiation markers of
    /// participants who are gone.
    pub async fn sync_roster(&self, participants: &[Participant]) {
        let current: HashSet<&str> = participants
            .iter()
            .map(|p| p.participant_id.as_str())
            .filter(|id| *id != self.inner.local_id)
            .collect();
        {
            let mut initiated = self.inner.initiated.lock().await;
            initiated.retain(|id| current.contains(id.as_str()));
        }
        for remote_id in current {
            self.inner.consider_call(remote_id).await;
        }
    }

    /// A participant just joined: same decision as the roster pass, so a
    /// newcomer and an existing member never both offer.
    pub async fn handle_participant_joined(&self, remote_id: &str) {
        self.inner.consider_call(remote_id).await;
    }

    /// A participant left: drop the link and any pending reconnect.
    pub async fn handle_participant_left(&self, remote_id: &str) {
        self.inner.cancel_reconnect_timer(remote_id).await;
        self.inner.teardown_link(remote_id).await;
    }

    /// A relayed handshake payload from `from` arrived.
    pub async fn handle_signal(&self, from: &str, payload: SignalPayload) {
        if from == self.inner.local_id {
            return;
        }
        match payload.kind {
            SignalKind::Offer => self.inner.handle_offer(from, payload.data).await,
            SignalKind::Answer => self.inner.handle_answer(from, payload.data).await,
            SignalKind::IceCandidate => self.inner.handle_candidate(from, payload.data).await,
        }
    }

    /// The process returned to the foreground: re-acquire ended local
    /// tracks (swapping them into every link without renegotiating) and
    /// re-evaluate every link's health, including whether a nominally
    /// connected link still carries live remote media.
    pub async fn handle_foreground(&self) {
        let inner = &self.inner;

        let needs_media = inner
            .media
            .lock()
            .await
            .as_ref()
            .is_none_or(|m| m.any_track_ended());
        if needs_media {
            match inner.media_source.acquire().await {
                Ok(fresh) => {
                    *inner.media.lock().await = Some(fresh.clone());
                    let handles: Vec<(String, Arc<dyn PeerLinkHandle>)> = inner
                        .links
                        .lock()
                        .await
                        .iter()
                        .map(|(id, l)| (id.clone(), l.handle.clone()))
                        .collect();
                    for (remote_id, handle) in handles {
                        if let Err(e) = handle.replace_local_tracks(&fresh).await {
                            tracing::warn!(
                                "Failed to replace tracks on link to '{}': {}",
                                remote_id,
                                e
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to re-acquire media after foregrounding: {}", e);
                }
            }
        }

        let snapshot: Vec<(String, LinkPhase, Arc<dyn PeerLinkHandle>)> = inner
            .links
            .lock()
            .await
            .iter()
            .map(|(id, l)| (id.clone(), l.phase, l.handle.clone()))
            .collect();
        for (remote_id, phase, handle) in snapshot {
            let broken = phase.needs_reconnect() || phase == LinkPhase::Closed;
            let silent = phase == LinkPhase::Connected && !handle.has_live_remote_media();
            if broken || silent {
                tracing::info!(
                    "Link to '{}' unhealthy after foregrounding ({:?}), reconnecting",
                    remote_id,
                    phase
                );
                inner.cancel_reconnect_timer(&remote_id).await;
                rebuild_link(inner, &remote_id).await;
            }
        }
    }

    /// Flip the local audio track. Never touches any link.
    pub async fn set_audio_enabled(&self, enabled: bool) {
        if let Some(media) = self.inner.media.lock().await.as_ref() {
            media.audio.set_enabled(enabled);
        }
    }

    /// Flip the local video track. Never touches any link.
    pub async fn set_video_enabled(&self, enabled: bool) {
        if let Some(media) = self.inner.media.lock().await.as_ref() {
            media.video.set_enabled(enabled);
        }
    }

    pub async fn link_phase(&self, remote_id: &str) -> Option<LinkPhase> {
        self.inner.links.lock().await.get(remote_id).map(|l| l.phase)
    }

    pub async fn link_count(&self) -> usize {
        self.inner.links.lock().await.len()
    }

    /// Close every link, cancel every timer, release local media. Nothing
    /// owned by the mesh survives this call.
    pub async fn shutdown(self) {
        self.health_task.abort();
        for (_, timer) in self.inner.reconnect_timers.lock().await.drain() {
            timer.abort();
        }
        let links: Vec<Link> = self
            .inner
            .links
            .lock()
            .await
            .drain()
            .map(|(_, link)| link)
            .collect();
        for link in links {
            link.handle.close().await;
        }
        self.inner.initiated.lock().await.clear();
        if let Some(media) = self.inner.media.lock().await.take() {
            media.stop();
        }
        self.pump_task.abort();
    }
}

impl MeshInner {
    /// Apply the glare rule and the duplicate-initiation guard, then start
    /// a call if both let us.
    async fn consider_call(&self, remote_id: &str) {
        if remote_id == self.local_id {
            return;
        }
        if !link::should_initiate(&self.local_id, remote_id) {
            tracing::debug!("Waiting for offer from '{}'", remote_id);
            return;
        }
        {
            let mut initiated = self.initiated.lock().await;
            if !initiated.insert(remote_id.to_string()) {
                tracing::debug!("Call to '{}' already underway, skipping", remote_id);
                return;
            }
        }
        {
            let links = self.links.lock().await;
            if let Some(link) = links.get(remote_id)
                && matches!(
                    link.phase,
                    LinkPhase::Offering | LinkPhase::Answering | LinkPhase::Connected
                )
            {
                return;
            }
        }
        if let Err(e) = self.start_call(remote_id).await {
            tracing::warn!("Failed to start call to '{}': {}", remote_id, e);
            self.initiated.lock().await.remove(remote_id);
            self.teardown_link(remote_id).await;
        }
    }

    /// Build a link toward `remote_id` and send the offer.
    async fn start_call(&self, remote_id: &str) -> Result<(), crate::error::PeerError> {
        let media = self.media.lock().await.clone().ok_or_else(|| {
            crate::error::PeerError::Transport("no local media acquired".to_string())
        })?;

        // Discard a broken leftover link first.
        if let Some(old) = self.links.lock().await.remove(remote_id) {
            old.handle.close().await;
        }

        let handle: Arc<dyn PeerLinkHandle> = Arc::from(
            self.connector
                .connect(&self.config.ice, remote_id, &media, self.link_events.clone())
                .await?,
        );
        let offer = match handle.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                handle.close().await;
                return Err(e);
            }
        };

        self.links.lock().await.insert(
            remote_id.to_string(),
            Link {
                handle,
                phase: LinkPhase::Offering,
            },
        );
        self.emit_phase(remote_id, LinkPhase::Offering);
        tracing::info!("Sent offer to '{}'", remote_id);
        self.send_signal(remote_id, SignalKind::Offer, offer);
        Ok(())
    }

    async fn handle_offer(&self, from: &str, offer: SessionDescription) {
        // A connected link takes the offer as renegotiation; a link still
        // mid-negotiation (or broken) is discarded and rebuilt.
        let mut reusable: Option<Arc<dyn PeerLinkHandle>> = None;
        let mut discarded: Option<Arc<dyn PeerLinkHandle>> = None;
        {
            let mut links = self.links.lock().await;
            match links.get(from).map(|l| l.phase) {
                Some(LinkPhase::Connected) => {
                    reusable = links.get(from).map(|l| l.handle.clone());
                }
                Some(phase) => {
                    tracing::debug!(
                        "Discarding link to '{}' in {:?} before answering new offer",
                        from,
                        phase
                    );
                    discarded = links.remove(from).map(|l| l.handle);
                }
                None => {}
            }
        }
        if let Some(handle) = discarded {
            handle.close().await;
        }

        let handle = match reusable {
            Some(handle) => handle,
            None => {
                let Some(media) = self.media.lock().await.clone() else {
                    tracing::warn!("Offer from '{}' before local media is ready, dropping", from);
                    return;
                };
                let handle = match self
                    .connector
                    .connect(&self.config.ice, from, &media, self.link_events.clone())
                    .await
                {
                    Ok(handle) => Arc::from(handle),
                    Err(e) => {
                        tracing::warn!("Failed to create link for offer from '{}': {}", from, e);
                        return;
                    }
                };
                self.links.lock().await.insert(
                    from.to_string(),
                    Link {
                        handle: Arc::clone(&handle),
                        phase: LinkPhase::Answering,
                    },
                );
                self.emit_phase(from, LinkPhase::Answering);
                handle
            }
        };

        match handle.accept_offer(offer).await {
            Ok(answer) => {
                tracing::info!("Sent answer to '{}'", from);
                self.send_signal(from, SignalKind::Answer, answer);
            }
            Err(e) => {
                tracing::warn!("Failed to answer offer from '{}': {}", from, e);
            }
        }
    }

    async fn handle_answer(&self, from: &str, answer: SessionDescription) {
        let handle = {
            let links = self.links.lock().await;
            match links.get(from) {
                None => {
                    tracing::warn!("Answer from '{}' for no link, ignoring", from);
                    return;
                }
                Some(link) if !link.phase.accepts_answer() => {
                    tracing::warn!(
                        "Answer from '{}' in {:?} state, ignoring (stale or duplicate)",
                        from,
                        link.phase
                    );
                    return;
                }
                Some(link) => link.handle.clone(),
            }
        };
        match handle.accept_answer(answer).await {
            Ok(()) => {
                // Applying the answer completes negotiation.
                self.set_phase(from, LinkPhase::Connected).await;
                tracing::info!("Negotiation with '{}' complete", from);
            }
            Err(e) => {
                tracing::warn!("Failed to apply answer from '{}': {}", from, e);
            }
        }
    }

    async fn handle_candidate(&self, from: &str, candidate: serde_json::Value) {
        let handle = self.links.lock().await.get(from).map(|l| l.handle.clone());
        match handle {
            None => {
                tracing::warn!("Candidate from '{}' for unknown link, dropping", from);
            }
            Some(handle) => {
                // Candidates are order-independent once a remote description
                // is set; early or duplicate ones may fail and that is fine.
                if let Err(e) = handle.add_remote_candidate(candidate).await {
                    tracing::warn!("Failed to apply candidate from '{}': {}", from, e);
                }
            }
        }
    }

    async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::ConnectivityChanged { remote_id, state } => {
                if let Some(phase) = LinkPhase::from_connectivity(state) {
                    self.set_phase(&remote_id, phase).await;
                }
            }
            LinkEvent::LocalCandidate {
                remote_id,
                candidate,
            } => {
                self.send_signal(&remote_id, SignalKind::IceCandidate, candidate);
            }
            LinkEvent::RemoteMedia { remote_id, stream } => {
                let _ = self.events.send(MeshEvent::RemoteMedia { remote_id, stream });
            }
        }
    }

    async fn set_phase(&self, remote_id: &str, phase: LinkPhase) {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get_mut(remote_id)
            && link.phase != phase
        {
            link.phase = phase;
            drop(links);
            self.emit_phase(remote_id, phase);
        }
    }

    fn emit_phase(&self, remote_id: &str, phase: LinkPhase) {
        let _ = self.events.send(MeshEvent::PhaseChanged {
            remote_id: remote_id.to_string(),
            phase,
        });
    }

    fn send_signal(&self, to: &str, kind: SignalKind, data: serde_json::Value) {
        let signal = OutboundSignal {
            to: to.to_string(),
            payload: SignalPayload { kind, data },
        };
        if self.signals.send(signal).is_err() {
            tracing::warn!("Signal channel closed, dropping {:?} to '{}'", kind, to);
        }
    }

    /// Remove and close the link, clearing the initiation marker so a
    /// future reconnect is not permanently blocked.
    async fn teardown_link(&self, remote_id: &str) {
        let link = self.links.lock().await.remove(remote_id);
        self.initiated.lock().await.remove(remote_id);
        if let Some(link) = link {
            link.handle.close().await;
            let _ = self.events.send(MeshEvent::LinkRemoved {
                remote_id: remote_id.to_string(),
            });
        }
    }

    async fn cancel_reconnect_timer(&self, remote_id: &str) {
        if let Some(timer) = self.reconnect_timers.lock().await.remove(remote_id) {
            timer.abort();
        }
    }
}

/// Health sweep: schedule a delayed, deduplicated reconnect for every link
/// the transport reports broken.
async fn sweep_broken_links(inner: &Arc<MeshInner>) {
    let broken: Vec<String> = inner
        .links
        .lock()
        .await
        .iter()
        .filter(|(_, link)| link.phase.needs_reconnect())
        .map(|(id, _)| id.clone())
        .collect();
    for remote_id in broken {
        schedule_reconnect(inner, &remote_id).await;
    }
}

async fn schedule_reconnect(inner: &Arc<MeshInner>, remote_id: &str) {
    let mut timers = inner.reconnect_timers.lock().await;
    if timers.contains_key(remote_id) {
        return;
    }
    tracing::info!("Link to '{}' broken, scheduling reconnect", remote_id);
    let task_inner = inner.clone();
    let id = remote_id.to_string();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(task_inner.config.reconnect_delay).await;
        // Deregister ourselves first; aborting the running task here would
        // cancel the reconnect itself.
        task_inner.reconnect_timers.lock().await.remove(&id);
        rebuild_link(&task_inner, &id).await;
    });
    timers.insert(remote_id.to_string(), timer);
}

/// Tear the link down fully, let the transport settle, then re-run the
/// glare decision: only the side with the smaller id re-initiates, the
/// other goes back to waiting for an offer.
async fn rebuild_link(inner: &Arc<MeshInner>, remote_id: &str) {
    inner.teardown_link(remote_id).await;
    tokio::time::sleep(inner.config.teardown_settle).await;
    inner.consider_call(remote_id).await;
}
