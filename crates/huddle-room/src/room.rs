//! Room actor: an isolated Tokio task that owns one room's state.
//!
//! Membership, the vote ledger and the round state live inside the actor
//! task and are only ever touched by it. Everything else talks to the room
//! through a [`RoomHandle`], which pushes [`RoomCommand`]s onto the actor's
//! single queue. Commands are processed strictly in arrival order.
//!
//! The actor never waits on a member. Outbound envelopes go out with
//! `try_send`; a member whose queue is full or closed is marked as lagging,
//! receives nothing further, and is evicted at the end of the current step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use huddle_protocol::{ClientId, Envelope, MessageType, Reason, RoomCode, VotePayload};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{RoomConfig, RoomError, RoundState};

/// Channel sender for delivering envelopes to one member's connection.
pub type MemberSender = mpsc::Sender<Envelope>;

/// Receiving end of a member's outbound queue, drained by its session.
pub type MemberReceiver = mpsc::Receiver<Envelope>;

/// Creates a bounded outbound queue for one member.
pub fn outbound_channel(capacity: usize) -> (MemberSender, MemberReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Called once with the room's code after its last member left.
pub(crate) type RetireHook = Box<dyn FnOnce(&RoomCode) + Send + 'static>;

/// A client asking to join a room.
///
/// The room takes ownership of `outbound`: it is the only sender for the
/// member's queue, so dropping it when the member is removed closes the
/// queue.
#[derive(Debug)]
pub struct Member {
    pub id: ClientId,
    pub name: String,
    pub is_host: bool,
    pub outbound: MemberSender,
}

impl Member {
    pub fn host(id: ClientId, name: impl Into<String>, outbound: MemberSender) -> Self {
        Self {
            id,
            name: name.into(),
            is_host: true,
            outbound,
        }
    }

    pub fn participant(id: ClientId, name: impl Into<String>, outbound: MemberSender) -> Self {
        Self {
            id,
            name: name.into(),
            is_host: false,
            outbound,
        }
    }
}

/// Commands sent to a room actor through its channel.
#[derive(Debug)]
pub(crate) enum RoomCommand {
    /// Add a member. Refused joins leave the room untouched.
    Join {
        member: Member,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Remove a member, closing its outbound queue.
    Leave { client: ClientId },

    /// An envelope received from a member's connection.
    Deliver { client: ClientId, envelope: Envelope },

    /// Request a snapshot of the room.
    Info { reply: oneshot::Sender<RoomInfo> },

    /// Close every member's queue and stop the actor.
    Shutdown,
}

/// A snapshot of a room's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub code: RoomCode,
    pub round: RoundState,
    /// Number of members, host included.
    pub member_count: usize,
    pub has_host: bool,
    /// Non-host display names, in join order.
    pub participants: Vec<String>,
    pub ledger: BTreeMap<String, String>,
}

/// Liveness data the room shares with the idle sweep.
#[derive(Debug)]
pub struct RoomActivity {
    last_activity: Mutex<Instant>,
    members: AtomicUsize,
}

impl RoomActivity {
    fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
            members: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn set_member_count(&self, count: usize) {
        self.members.store(count, Ordering::Release);
    }

    /// When the room last saw a join, a leave or an envelope.
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }

    pub fn member_count(&self) -> usize {
        self.members.load(Ordering::Acquire)
    }
}

/// Handle to a running room actor. Used to send commands to it.
///
/// Cheap to clone. The [`RoomRegistry`](crate::RoomRegistry) holds one per
/// room and sessions hold another.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    code: RoomCode,
    sender: mpsc::Sender<RoomCommand>,
    activity: std::sync::Arc<RoomActivity>,
}

impl RoomHandle {
    /// Returns the room's code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn activity(&self) -> &RoomActivity {
        &self.activity
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Asks the room to admit `member`.
    ///
    /// On success the joiner has been sent the participant list and, for a
    /// participant, everyone has been told about the join.
    ///
    /// # Errors
    /// [`RoomError::HostTaken`], [`RoomError::NameTaken`] or
    /// [`RoomError::AlreadyJoined`] if the room refuses the member, and
    /// [`RoomError::Unavailable`] if the room is retired.
    pub async fn join(&self, member: Member) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Join {
                member,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))?
    }

    /// Tells the room a member is gone (fire-and-forget).
    pub async fn leave(&self, client: ClientId) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Leave { client })
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }

    /// Delivers an envelope received from `client` (fire-and-forget).
    pub async fn deliver(&self, client: ClientId, envelope: Envelope) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Deliver { client, envelope })
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }

    /// Requests a snapshot of the room.
    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Info { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }

    /// Tells the room to close every member's queue and stop.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    code: RoomCode,
    round: RoundState,
    /// Keyed by client id; ids are handed out in increasing order, so
    /// iteration follows join order.
    members: BTreeMap<ClientId, Member>,
    /// Participant name → vote value for the current round.
    ledger: BTreeMap<String, String>,
    /// Members whose queue rejected a send during the current step.
    lagging: Vec<ClientId>,
    /// Set once membership drops to zero. Never cleared.
    retired: bool,
    activity: std::sync::Arc<RoomActivity>,
    receiver: mpsc::Receiver<RoomCommand>,
    on_retire: Option<RetireHook>,
}

impl RoomActor {
    /// Runs the actor loop until the room retires, is shut down, or every
    /// handle is dropped.
    async fn run(mut self) {
        tracing::info!(room = %self.code, "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join { member, reply } => {
                    let result = self.handle_join(member);
                    let _ = reply.send(result);
                }
                RoomCommand::Leave { client } => self.handle_leave(client),
                RoomCommand::Deliver { client, envelope } => {
                    self.handle_envelope(client, envelope);
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::Shutdown => {
                    tracing::info!(
                        room = %self.code,
                        members = self.members.len(),
                        "room shutting down"
                    );
                    self.members.clear();
                    self.activity.set_member_count(0);
                    break;
                }
            }

            self.evict_lagging();

            if self.retired {
                tracing::info!(room = %self.code, "room is empty, retiring");
                if let Some(on_retire) = self.on_retire.take() {
                    on_retire(&self.code);
                }
                break;
            }
        }

        tracing::info!(room = %self.code, "room actor stopped");
    }

    fn handle_join(&mut self, member: Member) -> Result<(), RoomError> {
        if self.members.contains_key(&member.id) {
            return Err(RoomError::AlreadyJoined(member.id, self.code.clone()));
        }
        if member.is_host && self.members.values().any(|m| m.is_host) {
            return Err(RoomError::HostTaken(self.code.clone()));
        }
        if !member.is_host
            && self
                .members
                .values()
                .any(|m| !m.is_host && m.name == member.name)
        {
            return Err(RoomError::NameTaken {
                code: self.code.clone(),
                name: member.name,
            });
        }

        let id = member.id;
        let is_host = member.is_host;
        let name = member.name.clone();
        self.members.insert(id, member);
        self.activity.set_member_count(self.members.len());
        self.activity.touch();

        tracing::info!(
            room = %self.code,
            client = %id,
            %name,
            is_host,
            members = self.members.len(),
            "member joined"
        );

        let list = Envelope::participant_list(&self.participant_names());
        self.send_to(id, list);
        if !is_host {
            self.broadcast(&Envelope::participant_join(&name));
        }

        Ok(())
    }

    fn handle_leave(&mut self, client: ClientId) {
        if self.remove_member(client).is_some() {
            self.activity.touch();
        } else {
            tracing::debug!(room = %self.code, %client, "leave from non-member, ignoring");
        }
    }

    fn handle_envelope(&mut self, client: ClientId, envelope: Envelope) {
        let Some(member) = self.members.get(&client) else {
            tracing::warn!(
                room = %self.code,
                %client,
                kind = %envelope.kind,
                "envelope from non-member, ignoring"
            );
            return;
        };
        let is_host = member.is_host;
        let name = member.name.clone();
        self.activity.touch();

        match envelope.kind {
            MessageType::Vote => self.handle_vote(client, is_host, name, &envelope),
            MessageType::Start => {
                if !is_host {
                    self.send_to(client, Envelope::error(Reason::OnlyHostCanStart));
                    return;
                }
                self.ledger.clear();
                self.round = RoundState::Voting;
                tracing::info!(room = %self.code, "round started");
                self.broadcast(&Envelope::start());
            }
            MessageType::Reset => {
                if !is_host {
                    self.send_to(client, Envelope::error(Reason::OnlyHostCanReset));
                    return;
                }
                self.ledger.clear();
                self.round = RoundState::Idle;
                tracing::info!(room = %self.code, "round reset");
                self.broadcast(&Envelope::reset());
            }
            MessageType::Other(_) => self.broadcast(&envelope),
            MessageType::VoteConfirmed
            | MessageType::VoteRejected
            | MessageType::VoteProgress
            | MessageType::Reveal
            | MessageType::ParticipantJoin
            | MessageType::ParticipantLeave
            | MessageType::ParticipantList
            | MessageType::Error => {
                tracing::warn!(
                    room = %self.code,
                    %client,
                    kind = %envelope.kind,
                    "dropping server-only message from client"
                );
            }
        }
    }

    fn handle_vote(&mut self, client: ClientId, is_host: bool, name: String, envelope: &Envelope) {
        if is_host {
            self.send_to(client, Envelope::vote_rejected(Reason::HostCannotVote));
            return;
        }
        let value = match envelope.payload_as::<VotePayload>() {
            Ok(payload) if !payload.value.trim().is_empty() => payload.value,
            _ => {
                tracing::debug!(room = %self.code, %client, "vote without a usable value");
                self.send_to(client, Envelope::vote_rejected(Reason::InvalidVote));
                return;
            }
        };
        if self.ledger.contains_key(&name) {
            self.send_to(client, Envelope::vote_rejected(Reason::AlreadyVoted));
            return;
        }

        self.ledger.insert(name, value);
        self.send_to(client, Envelope::vote_confirmed());

        let current = self.ledger.len();
        let total = self.eligible_voters();
        self.broadcast(&Envelope::vote_progress(current, total));

        if total > 0 && current == total {
            self.round = RoundState::Revealed;
            tracing::info!(room = %self.code, votes = current, "all votes in, revealing");
            let reveal = Envelope::reveal(&self.ledger);
            self.broadcast(&reveal);
        }
    }

    /// Removes a member, closing its queue by dropping the sender, and
    /// tells the rest of the room if it was a participant.
    fn remove_member(&mut self, client: ClientId) -> Option<Member> {
        let member = self.members.remove(&client)?;
        self.lagging.retain(|id| *id != client);
        self.activity.set_member_count(self.members.len());
        if !member.is_host {
            self.ledger.remove(&member.name);
        }

        tracing::info!(
            room = %self.code,
            %client,
            name = %member.name,
            members = self.members.len(),
            "member left"
        );

        if !member.is_host {
            self.broadcast(&Envelope::participant_leave(&member.name));
        }
        if self.members.is_empty() {
            self.retired = true;
        }
        Some(member)
    }

    /// Evicts every member whose queue rejected a send. Each eviction
    /// broadcasts a `participant_leave`, which can mark more members as
    /// lagging, so this loops until no laggard is left.
    fn evict_lagging(&mut self) {
        while !self.lagging.is_empty() {
            let client = self.lagging.remove(0);
            if let Some(member) = self.members.get(&client) {
                tracing::warn!(
                    room = %self.code,
                    %client,
                    name = %member.name,
                    closed = member.outbound.is_closed(),
                    "evicting member that stopped draining its queue"
                );
            }
            self.remove_member(client);
        }
    }

    /// Queues an envelope for one member. A full or closed queue marks the
    /// member as lagging; lagging members receive nothing further.
    fn send_to(&mut self, client: ClientId, envelope: Envelope) {
        if self.lagging.contains(&client) {
            return;
        }
        let Some(member) = self.members.get(&client) else {
            return;
        };
        match member.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => self.lagging.push(client),
        }
    }

    fn broadcast(&mut self, envelope: &Envelope) {
        let recipients: Vec<ClientId> = self.members.keys().copied().collect();
        for client in recipients {
            self.send_to(client, envelope.clone());
        }
    }

    fn participant_names(&self) -> Vec<String> {
        self.members
            .values()
            .filter(|m| !m.is_host)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Live non-host member count, recomputed on every vote.
    fn eligible_voters(&self) -> usize {
        self.members.values().filter(|m| !m.is_host).count()
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            code: self.code.clone(),
            round: self.round,
            member_count: self.members.len(),
            has_host: self.members.values().any(|m| m.is_host),
            participants: self.participant_names(),
            ledger: self.ledger.clone(),
        }
    }
}

/// Spawns a new room actor task and returns a handle to communicate with it.
///
/// `on_retire` runs inside the actor task when the room's last member
/// leaves.
pub(crate) fn spawn_room(
    code: RoomCode,
    config: &RoomConfig,
    on_retire: Option<RetireHook>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
    let activity = std::sync::Arc::new(RoomActivity::new());

    let actor = RoomActor {
        code: code.clone(),
        round: RoundState::Idle,
        members: BTreeMap::new(),
        ledger: BTreeMap::new(),
        lagging: Vec::new(),
        retired: false,
        activity: activity.clone(),
        receiver: rx,
        on_retire,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        code,
        sender: tx,
        activity,
    }
}
