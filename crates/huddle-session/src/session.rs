//! Client sessions: the glue between one connection and one room.
//!
//! A session owns two tasks:
//!
//! ```text
//!            inbound pump                          outbound pump
//! reader ── decode ── stamp sender ──▶ room ──▶ member queue ── encode ──▶ writer
//! ```
//!
//! The inbound pump stops on a clean close, a read error or an undecodable
//! frame, then tells the room the client left. The outbound pump stops when
//! the room closes the member's queue (leave, eviction, sweep) or a write
//! fails, then closes the connection. When the outbound pump exits the
//! inbound pump stops as well, so neither task outlives the other.

use std::sync::Arc;

use huddle_protocol::{ClientId, Codec, Envelope};
use huddle_room::{Member, MemberReceiver, RoomHandle, outbound_channel};
use huddle_transport::{CloseNotice, Connection, FrameReader, FrameWriter};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::SessionError;

/// Who is joining, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
    pub is_host: bool,
}

impl JoinRequest {
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_host: true,
        }
    }

    pub fn participant(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_host: false,
        }
    }
}

/// The two running pump tasks of an established session.
#[derive(Debug)]
pub struct ClientSession {
    client: ClientId,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ClientSession {
    /// Joins `conn` to `room` and starts its pumps.
    ///
    /// The client id is the connection id. If the room refuses the join the
    /// connection is closed with a policy close frame carrying the refusal
    /// reason, and no task is spawned.
    ///
    /// # Errors
    /// [`SessionError::JoinRefused`] if the room refused the member.
    pub async fn establish<C, K>(
        conn: C,
        room: RoomHandle,
        request: JoinRequest,
        codec: Arc<K>,
        outbound_capacity: usize,
    ) -> Result<Self, SessionError>
    where
        C: Connection,
        K: Codec,
    {
        let client = ClientId(conn.id().into_inner());
        let (reader, mut writer) = conn.split();
        let (tx, rx) = outbound_channel(outbound_capacity);
        let member = Member {
            id: client,
            name: request.name.clone(),
            is_host: request.is_host,
            outbound: tx,
        };

        if let Err(e) = room.join(member).await {
            tracing::info!(
                room = %room.code(),
                %client,
                name = %request.name,
                reason = e.reason(),
                "join refused"
            );
            // The peer may already be gone; the refusal stands either way.
            let _ = writer.close(Some(CloseNotice::policy(e.reason()))).await;
            return Err(SessionError::JoinRefused(e));
        }

        Ok(Self::spawn(client, request.name, room, reader, writer, rx, codec))
    }

    /// Starts both pumps for a client that is already a room member.
    pub fn spawn<R, W, K>(
        client: ClientId,
        name: String,
        room: RoomHandle,
        reader: R,
        writer: W,
        outbound: MemberReceiver,
        codec: Arc<K>,
    ) -> Self
    where
        R: FrameReader,
        W: FrameWriter,
        K: Codec,
    {
        let (writer_done_tx, writer_done_rx) = oneshot::channel();

        let outbound = tokio::spawn(outbound_pump(
            client,
            writer,
            outbound,
            codec.clone(),
            writer_done_tx,
        ));
        let inbound = tokio::spawn(inbound_pump(
            client,
            name,
            room,
            reader,
            codec,
            writer_done_rx,
        ));

        Self {
            client,
            inbound,
            outbound,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Waits for both pumps to finish.
    pub async fn closed(self) {
        let _ = self.inbound.await;
        let _ = self.outbound.await;
    }
}

async fn inbound_pump<R: FrameReader, K: Codec>(
    client: ClientId,
    name: String,
    room: RoomHandle,
    mut reader: R,
    codec: Arc<K>,
    mut writer_done: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            frame = reader.recv() => frame,
            _ = &mut writer_done => {
                tracing::debug!(%client, "outbound pump finished, stopping reader");
                break;
            }
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(%client, "connection closed by peer");
                break;
            }
            Err(e) => {
                tracing::debug!(%client, error = %e, "read failed");
                break;
            }
        };

        let envelope: Envelope = match codec.decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%client, error = %e, "undecodable frame, ending session");
                break;
            }
        };

        if room
            .deliver(client, envelope.stamped(name.as_str()))
            .await
            .is_err()
        {
            tracing::debug!(%client, room = %room.code(), "room is gone, stopping reader");
            break;
        }
    }

    // Leaving a stopped room, or one that already evicted us, is harmless.
    let _ = room.leave(client).await;
}

async fn outbound_pump<W: FrameWriter, K: Codec>(
    client: ClientId,
    mut writer: W,
    mut outbound: MemberReceiver,
    codec: Arc<K>,
    _writer_done: oneshot::Sender<()>,
) {
    while let Some(envelope) = outbound.recv().await {
        let frame = match codec.encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    %client,
                    kind = %envelope.kind,
                    error = %e,
                    "dropping unencodable envelope"
                );
                continue;
            }
        };
        if let Err(e) = writer.send(&frame).await {
            tracing::debug!(%client, error = %e, "write failed");
            break;
        }
    }

    // Dropping the receiver here lets the room see a closed queue if it
    // hasn't removed us yet.
    drop(outbound);
    if let Err(e) = writer.close(None).await {
        tracing::debug!(%client, error = %e, "close failed");
    }
}
