//! The session actor.
//!
//! All mutable session state -- link state, the outbox, threads, read
//! state -- lives inside one spawned task driven by `tokio::select!`
//! over commands, inbound frames, delivery-timer ticks, and the
//! keepalive interval. Nothing else mutates that state, so no locking is
//! needed. The presentation layer talks to the actor through
//! [`SessionCommand`] / [`SessionEvent`] channels.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use huddle_proto::frame::{ClientFrame, ServerFrame, validate_text};
use huddle_proto::ident::{RefId, Timestamp, UserId};

use crate::channel::{Channel, ChannelError, Connector};
use crate::link::{Credentials, EstablishError, LinkConfig, LinkState, authenticate, establish};
use crate::notify::Notice;
use crate::outbox::{Outbox, SendOutcome, arm_delivery_timer};
use crate::receipts::ReadTracker;
use crate::reconcile::{Admitted, Push, reconcile_push};
use crate::thread::{Delivery, ThreadMessage, ThreadStore};

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Opaque login credentials from the external auth flow.
    pub credentials: Credentials,
    /// Connection lifecycle timeouts and reconnect policy.
    pub link: LinkConfig,
    /// How long a send may stay unacknowledged before it fails.
    pub delivery_timeout: Duration,
    /// Window for the content+time duplicate heuristic, in milliseconds.
    pub duplicate_window_ms: u64,
    /// Capacity of the command channel.
    pub command_buffer: usize,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl SessionConfig {
    /// Configuration with default timeouts for the given credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            link: LinkConfig::default(),
            delivery_timeout: Duration::from_secs(5),
            duplicate_window_ms: 1000,
            command_buffer: 256,
            event_buffer: 256,
        }
    }
}

/// Commands sent from the presentation layer to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send a direct message to a peer.
    SendMessage {
        /// The addressed recipient.
        to: UserId,
        /// Message text.
        text: String,
    },
    /// The user opened (or closed, with `None`) a peer's thread.
    ///
    /// Opening a thread with unread messages emits the read signal.
    OpenThread {
        /// The peer whose thread is now visible.
        peer: Option<UserId>,
    },
    /// Seed a thread from the external history read path.
    SeedThread {
        /// The peer whose history was fetched.
        peer: UserId,
        /// Messages returned by the read path.
        messages: Vec<ThreadMessage>,
    },
    /// End the session: cancel timers, discard pending sends, close the
    /// connection.
    Logout,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit logout.
    Logout,
    /// The router rejected the credentials; re-login required.
    AuthFailed,
    /// All reconnect attempts were exhausted; user-initiated retry
    /// required.
    ReconnectsExhausted,
}

/// Events pushed from the session actor to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The link state changed.
    LinkChanged {
        /// The new state.
        state: LinkState,
    },
    /// A reconnect attempt is starting.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Configured attempt bound.
        max_attempts: u32,
    },
    /// A message was optimistically added to a thread (delivery pending).
    MessageSent {
        /// Correlation id of the send.
        ref_id: RefId,
        /// The thread it was added to.
        peer: UserId,
        /// Message text.
        text: String,
        /// Optimistic timestamp.
        timestamp: Timestamp,
    },
    /// A previously sent message reached a terminal delivery state.
    DeliveryUpdated {
        /// Correlation id of the send.
        ref_id: RefId,
        /// The thread holding the message.
        peer: UserId,
        /// The new delivery state.
        delivery: Delivery,
    },
    /// An inbound message was admitted into a thread.
    MessageReceived {
        /// The thread it was admitted into.
        peer: UserId,
        /// Display name of the sender.
        sender_name: String,
        /// Message text.
        text: String,
        /// Server timestamp.
        timestamp: Timestamp,
    },
    /// The open thread received a message; the view should follow it.
    ScrollToLatest {
        /// The thread to scroll.
        peer: UserId,
    },
    /// A peer has read the local user's messages.
    PeerReadMessages {
        /// The peer that read them.
        by: UserId,
    },
    /// A user-facing notification.
    Notice(Notice),
    /// The session ended; no further events will follow.
    SessionEnded {
        /// Why it ended.
        reason: EndReason,
    },
}

/// Connect, authenticate, and spawn the session actor.
///
/// Returns the command sender and event receiver on success. An initial
/// connect or handshake failure is returned to the caller instead of
/// spawning, so the application can fall back to an offline mode.
///
/// # Errors
///
/// Returns [`EstablishError`] if the initial connect-and-authenticate
/// pass fails.
pub async fn spawn_session<C>(
    connector: C,
    config: SessionConfig,
) -> Result<(mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionEvent>), EstablishError>
where
    C: Connector + 'static,
{
    let chan = establish(&connector, &config.credentials, &config.link).await?;

    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let (evt_tx, evt_rx) = mpsc::channel(config.event_buffer);
    let (tick_tx, tick_rx) = mpsc::channel(64);

    let actor = SessionActor {
        connector,
        local: config.credentials.user_id.clone(),
        outbox: Outbox::new(),
        threads: ThreadStore::new(config.duplicate_window_ms),
        reads: ReadTracker::new(),
        active_peer: None,
        link: LinkState::Disconnected,
        tick_tx,
        events: evt_tx,
        config,
    };

    tokio::spawn(actor.run(chan, cmd_rx, tick_rx));

    Ok((cmd_tx, evt_rx))
}

struct SessionActor<C: Connector> {
    connector: C,
    config: SessionConfig,
    local: UserId,
    outbox: Outbox,
    threads: ThreadStore,
    reads: ReadTracker,
    /// The thread the user currently has open, if any.
    active_peer: Option<UserId>,
    link: LinkState,
    /// Cloned into every delivery timer so expiries come back to us.
    tick_tx: mpsc::Sender<RefId>,
    events: mpsc::Sender<SessionEvent>,
}

impl<C: Connector> SessionActor<C> {
    async fn run(
        mut self,
        mut chan: C::Chan,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut tick_rx: mpsc::Receiver<RefId>,
    ) {
        self.set_link(LinkState::Ready).await;
        let mut keepalive = keepalive_timer(self.config.link.keepalive_interval);

        loop {
            let lost = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Logout) => {
                        self.teardown(EndReason::Logout).await;
                        return;
                    }
                    Some(cmd) => self.handle_command(&chan, cmd).await.is_err(),
                },
                frame = chan.recv() => match frame {
                    Ok(frame) => self.handle_frame(&chan, frame).await.is_err(),
                    Err(_) => true,
                },
                tick = tick_rx.recv() => {
                    if let Some(ref_id) = tick {
                        self.on_delivery_timeout(ref_id).await;
                    }
                    false
                }
                _ = keepalive.tick() => {
                    chan.send(&ClientFrame::Ping).await.is_err()
                }
            };

            if lost {
                match self.reconnect().await {
                    Ok(new_chan) => {
                        chan = new_chan;
                        // The keepalive belongs to the connection; re-arm
                        // it for the fresh one.
                        keepalive = keepalive_timer(self.config.link.keepalive_interval);
                    }
                    Err(reason) => {
                        self.teardown(reason).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        chan: &C::Chan,
        cmd: SessionCommand,
    ) -> Result<(), ChannelError> {
        match cmd {
            SessionCommand::SendMessage { to, text } => self.begin_send(chan, to, text).await,
            SessionCommand::OpenThread { peer } => {
                self.active_peer.clone_from(&peer);
                if let Some(peer) = peer {
                    self.signal_read(chan, &peer).await?;
                }
                Ok(())
            }
            SessionCommand::SeedThread { peer, messages } => {
                self.threads.seed(&peer, messages);
                Ok(())
            }
            SessionCommand::Logout => Ok(()), // handled in the select loop
        }
    }

    /// Optimistic send: thread insert + pending entry + armed timer, then
    /// transmit. A transmit failure keeps the pending entry -- its timer
    /// still guarantees a terminal state -- and reports the link as lost.
    async fn begin_send(
        &mut self,
        chan: &C::Chan,
        to: UserId,
        text: String,
    ) -> Result<(), ChannelError> {
        if let Err(e) = validate_text(&text) {
            self.notice(Notice::warning(e.to_string())).await;
            return Ok(());
        }

        let ref_id = RefId::new();
        let created_at = Timestamp::now();
        self.threads.insert(
            &to,
            ThreadMessage {
                id: None,
                ref_id: Some(ref_id),
                sender: self.local.clone(),
                receiver: to.clone(),
                text: text.clone(),
                timestamp: created_at,
                read: false,
                delivery: Delivery::Pending,
            },
        );
        let timer = arm_delivery_timer(ref_id, self.config.delivery_timeout, self.tick_tx.clone());
        self.outbox.begin(ref_id, to.clone(), timer);

        self.emit(SessionEvent::MessageSent {
            ref_id,
            peer: to.clone(),
            text: text.clone(),
            timestamp: created_at,
        })
        .await;

        chan.send(&ClientFrame::SendDirectMessage {
            ref_id,
            receiver: to,
            text,
        })
        .await
    }

    async fn handle_frame(
        &mut self,
        chan: &C::Chan,
        frame: ServerFrame,
    ) -> Result<(), ChannelError> {
        match frame {
            ServerFrame::SendAccepted {
                ref_id,
                id,
                timestamp,
            } => {
                let outcome = SendOutcome::Accepted { id, timestamp };
                if let Some(resolved) = self.outbox.resolve(ref_id, &outcome) {
                    self.threads.adopt(&resolved.receiver, ref_id, id, timestamp);
                    self.emit(SessionEvent::DeliveryUpdated {
                        ref_id,
                        peer: resolved.receiver,
                        delivery: Delivery::Confirmed,
                    })
                    .await;
                } else {
                    // The echo won the race; nothing left to do.
                    tracing::debug!(%ref_id, "acknowledgment for already-resolved send");
                }
                Ok(())
            }
            ServerFrame::SendRejected { ref_id, reason } => {
                let outcome = SendOutcome::Rejected {
                    reason: reason.clone(),
                };
                if let Some(resolved) = self.outbox.resolve(ref_id, &outcome) {
                    self.threads
                        .update_delivery(&resolved.receiver, ref_id, Delivery::Failed);
                    self.emit(SessionEvent::DeliveryUpdated {
                        ref_id,
                        peer: resolved.receiver,
                        delivery: Delivery::Failed,
                    })
                    .await;
                    self.notice(Notice::warning(reason)).await;
                }
                Ok(())
            }
            ServerFrame::DirectMessage {
                id,
                sender,
                sender_name,
                text,
                timestamp,
                ref_id,
            } => {
                let push = Push {
                    id,
                    sender,
                    sender_name: sender_name.clone(),
                    text: text.clone(),
                    timestamp,
                    ref_id,
                };
                match reconcile_push(
                    &mut self.outbox,
                    &mut self.threads,
                    &self.local,
                    self.active_peer.as_ref(),
                    push,
                ) {
                    Admitted::Superseded { ref_id, peer } => {
                        self.emit(SessionEvent::DeliveryUpdated {
                            ref_id,
                            peer,
                            delivery: Delivery::Confirmed,
                        })
                        .await;
                        Ok(())
                    }
                    Admitted::Inserted { peer, marked_read } => {
                        self.emit(SessionEvent::MessageReceived {
                            peer: peer.clone(),
                            sender_name,
                            text,
                            timestamp,
                        })
                        .await;
                        if marked_read {
                            self.emit(SessionEvent::ScrollToLatest { peer: peer.clone() })
                                .await;
                            chan.send(&ClientFrame::MarkMessagesRead { sender: peer })
                                .await?;
                        }
                        Ok(())
                    }
                    Admitted::Duplicate | Admitted::Malformed => Ok(()),
                }
            }
            ServerFrame::MessagesRead { by } => {
                self.reads.on_peer_read(&mut self.threads, &by);
                self.emit(SessionEvent::PeerReadMessages { by }).await;
                Ok(())
            }
            ServerFrame::Error { message } => {
                self.notice(Notice::warning(message)).await;
                Ok(())
            }
            ServerFrame::Authenticated { user_id } => {
                tracing::warn!(%user_id, "unexpected Authenticated frame outside handshake");
                Ok(())
            }
        }
    }

    /// Send the read signal for `peer` if anything there is unread.
    async fn signal_read(&mut self, chan: &C::Chan, peer: &UserId) -> Result<(), ChannelError> {
        if ReadTracker::mark_read(&mut self.threads, peer) {
            chan.send(&ClientFrame::MarkMessagesRead {
                sender: peer.clone(),
            })
            .await?;
        }
        Ok(())
    }

    async fn on_delivery_timeout(&mut self, ref_id: RefId) {
        if let Some(resolved) = self.outbox.resolve(ref_id, &SendOutcome::TimedOut) {
            self.threads
                .update_delivery(&resolved.receiver, ref_id, Delivery::Failed);
            self.emit(SessionEvent::DeliveryUpdated {
                ref_id,
                peer: resolved.receiver,
                delivery: Delivery::Failed,
            })
            .await;
            self.notice(Notice::warning("message could not be delivered"))
                .await;
        }
    }

    /// Bounded reconnect with backoff; re-authenticates on every attempt.
    async fn reconnect(&mut self) -> Result<C::Chan, EndReason> {
        self.set_link(LinkState::Reconnecting).await;
        let max_attempts = self.config.link.reconnect.max_attempts;

        for attempt in 1..=max_attempts {
            self.emit(SessionEvent::Reconnecting {
                attempt,
                max_attempts,
            })
            .await;
            tokio::time::sleep(self.config.link.reconnect.delay_for(attempt)).await;

            self.set_link(LinkState::Connecting).await;
            let chan = match self.connector.open().await {
                Ok(chan) => chan,
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, err = %e, "reconnect attempt failed");
                    self.set_link(LinkState::Reconnecting).await;
                    continue;
                }
            };
            self.set_link(LinkState::Connected).await;

            // The router trusts nothing on a fresh connection: the
            // handshake runs again before any send.
            self.set_link(LinkState::Authenticating).await;
            match authenticate(
                &chan,
                &self.config.credentials,
                self.config.link.auth_timeout,
            )
            .await
            {
                Ok(()) => {
                    self.set_link(LinkState::Ready).await;
                    self.notice(Notice::info("reconnected")).await;
                    return Ok(chan);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(err = %e, "re-authentication failed, ending session");
                    self.notice(Notice::error(format!("session rejected: {e}")))
                        .await;
                    return Err(EndReason::AuthFailed);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, err = %e, "reconnect attempt failed");
                    self.set_link(LinkState::Reconnecting).await;
                }
            }
        }

        self.notice(Notice::error(
            "could not reconnect; check your connection and retry",
        ))
        .await;
        Err(EndReason::ReconnectsExhausted)
    }

    /// End-of-session cleanup: every delivery timer is aborted and no
    /// pending entry survives.
    async fn teardown(&mut self, reason: EndReason) {
        let discarded = self.outbox.discard_all();
        if discarded > 0 {
            tracing::debug!(discarded, "pending sends discarded at teardown");
        }
        self.set_link(LinkState::Disconnected).await;
        self.emit(SessionEvent::SessionEnded { reason }).await;
    }

    async fn set_link(&mut self, state: LinkState) {
        if self.link != state {
            self.link = state;
            self.emit(SessionEvent::LinkChanged { state }).await;
        }
    }

    async fn notice(&self, notice: Notice) {
        self.emit(SessionEvent::Notice(notice)).await;
    }

    async fn emit(&self, event: SessionEvent) {
        // A dropped receiver means the presentation layer is gone; the
        // command channel will close right after and end the loop.
        let _ = self.events.send(event).await;
    }
}

/// Keepalive interval that fires one period from now, then periodically.
fn keepalive_timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
