//! Per-connection handler: admission, then the client session.
//!
//! Each accepted TCP connection gets its own task running this handler.
//! The flow is:
//!   1. Routing: plain HTTP requests (`GET /health`, `POST /create`) are
//!      answered directly and the connection closes
//!   2. Upgrade gate: path, secret, rate limit, join parameters, room lookup
//!   3. WebSocket upgrade, with the room code in the response headers
//!   4. Join the room and run the session pumps until the client is gone
//!
//! Nothing is allocated for a client that fails step 2.

use std::sync::Arc;

use huddle_protocol::RoomCode;
use huddle_room::RoomHandle;
use huddle_session::{Authenticator, ClientSession, JoinRequest, RateLimiter, client_key};
use huddle_transport::{
    Admission, Incoming, PendingUpgrade, PlainRequest, Rejection, UpgradeRequest,
};

use crate::HuddleError;
use crate::server::ServerState;

/// The only path clients may upgrade on.
pub const WS_PATH: &str = "/ws";

/// Plain HTTP endpoint that creates a room and returns its code.
pub const CREATE_PATH: &str = "/create";

/// Plain HTTP liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Header clients present the shared secret in.
pub const SECRET_HEADER: &str = "x-client-secret";

/// Response header carrying the code of the room the client was admitted to.
pub const ROOM_CODE_HEADER: &str = "x-room-code";

/// How the client wants to enter a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Join,
}

/// Parsed and validated `/ws` query parameters.
#[derive(Debug, PartialEq, Eq)]
struct JoinParams {
    mode: Mode,
    code: Option<RoomCode>,
    name: String,
}

impl JoinParams {
    fn parse(request: &UpgradeRequest) -> Result<Self, Rejection> {
        let mode = match request.query_param("mode") {
            Some("create") => Mode::Create,
            Some("join") => Mode::Join,
            _ => return Err(Rejection::bad_request("mode must be create or join")),
        };

        let code = request
            .query_param("code")
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(RoomCode::new);

        let name = request.query_param("name").unwrap_or_default().trim().to_owned();

        if mode == Mode::Join {
            if code.is_none() {
                return Err(Rejection::bad_request("code is required to join"));
            }
            if name.is_empty() {
                return Err(Rejection::bad_request("name is required to join"));
            }
        }

        Ok(Self { mode, code, name })
    }

    fn into_request(self) -> JoinRequest {
        match self.mode {
            Mode::Create => JoinRequest::host(self.name),
            Mode::Join => JoinRequest::participant(self.name),
        }
    }
}

/// What the gate hands to the handler for an admitted client.
#[derive(Debug)]
pub(crate) struct Admitted {
    room: RoomHandle,
    request: JoinRequest,
}

/// Decides whether an upgrade request may proceed.
///
/// Checks run cheapest first. An unauthenticated client never touches the
/// rate limiter, and a rate-limited one never touches the registry.
pub(crate) fn admit<A, L>(
    state: &ServerState<A, L>,
    request: &UpgradeRequest,
) -> Result<Admission<Admitted>, Rejection>
where
    A: Authenticator,
    L: RateLimiter,
{
    if request.path() != WS_PATH {
        return Err(Rejection::not_found("not found"));
    }

    check_client(state, request)?;

    let params = JoinParams::parse(request)?;

    let room = match &params.code {
        Some(code) => state
            .registry
            .get(code)
            .map_err(|_| Rejection::not_found("room does not exist"))?,
        None => create_room(state)?,
    };

    let code = room.code().as_str().to_owned();
    Ok(Admission::new(Admitted {
        room,
        request: params.into_request(),
    })
    .with_header(ROOM_CODE_HEADER, code))
}

/// Secret first, then the rate limit. Shared by the upgrade gate and
/// `POST /create`.
fn check_client<A, L>(
    state: &ServerState<A, L>,
    request: &UpgradeRequest,
) -> Result<(), Rejection>
where
    A: Authenticator,
    L: RateLimiter,
{
    if let Err(e) = state.auth.authenticate(request.header(SECRET_HEADER)) {
        tracing::warn!(
            peer = %request.peer(),
            path = request.path(),
            error = %e,
            "rejected client"
        );
        return Err(Rejection::unauthorized());
    }

    let key = client_key(request);
    if !state.limiter.check(&key) {
        tracing::warn!(key = %key, path = request.path(), "rate limited client");
        return Err(Rejection::too_many_requests());
    }
    Ok(())
}

fn create_room<A, L>(state: &ServerState<A, L>) -> Result<RoomHandle, Rejection>
where
    A: Authenticator,
    L: RateLimiter,
{
    state.registry.create_room().map_err(|e| {
        tracing::error!(error = %e, "could not create room");
        Rejection::new(503, "no room code available")
    })
}

/// Answers a plain HTTP request with a status and a text body.
fn answer<A, L>(state: &ServerState<A, L>, method: &str, request: &UpgradeRequest) -> (u16, String)
where
    A: Authenticator,
    L: RateLimiter,
{
    let expected = match request.path() {
        HEALTH_PATH => "GET",
        CREATE_PATH => "POST",
        _ => return (404, "not found".to_owned()),
    };
    if method != expected {
        return (405, "method not allowed".to_owned());
    }
    if request.path() == HEALTH_PATH {
        return (200, "OK".to_owned());
    }

    let created = check_client(state, request).and_then(|()| create_room(state));
    match created {
        Ok(room) => {
            tracing::info!(peer = %request.peer(), room = %room.code(), "room created over HTTP");
            (200, room.code().as_str().to_owned())
        }
        Err(rejection) => (rejection.status, rejection.reason),
    }
}

async fn serve_http<A, L>(
    plain: PlainRequest,
    state: &ServerState<A, L>,
) -> Result<(), HuddleError>
where
    A: Authenticator,
    L: RateLimiter,
{
    let (status, body) = answer(state, plain.method(), plain.request());
    tracing::debug!(
        peer = %plain.request().peer(),
        method = plain.method(),
        path = plain.request().path(),
        status,
        "answered plain request"
    );
    plain.respond(status, &body).await?;
    Ok(())
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, L>(
    pending: PendingUpgrade,
    state: Arc<ServerState<A, L>>,
) -> Result<(), HuddleError>
where
    A: Authenticator,
    L: RateLimiter,
{
    let peer = pending.peer();
    let pending = match pending.route().await? {
        Incoming::Upgrade(pending) => pending,
        Incoming::Plain(plain) => return serve_http(plain, &state).await,
    };
    let (conn, admitted) = pending.upgrade(|request| admit(&state, request)).await?;
    let Admitted { room, request } = admitted;

    tracing::debug!(
        %peer,
        room = %room.code(),
        name = %request.name,
        host = request.is_host,
        "upgraded"
    );

    let session = ClientSession::establish(
        conn,
        room,
        request,
        Arc::clone(&state.codec),
        state.config.room.outbound_capacity,
    )
    .await?;
    session.closed().await;

    tracing::debug!(%peer, "connection finished");
    Ok(())
}
