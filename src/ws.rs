//! Live event feed over WebSocket.
//!
//! Handlers publish an [`Event`] on the shared broadcast channel after each
//! successful mutation. Every connected client gets the events of projects it
//! belongs to plus notifications addressed to it.

use std::collections::HashSet;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::SharedState;
use crate::auth;
use crate::errors::ApiError;
use crate::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Event types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ProjectCreated {
        project: Project,
    },
    ProjectUpdated {
        project: Project,
    },
    ProjectDeleted {
        project_id: i64,
    },
    MemberAdded {
        member: ProjectMember,
    },
    MemberUpdated {
        member: ProjectMember,
    },
    MemberRemoved {
        project_id: i64,
        user_id: i64,
    },
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskMoved {
        project_id: i64,
        task_id: i64,
        from_status: TaskStatus,
        to_status: TaskStatus,
        position: i32,
    },
    TaskDeleted {
        project_id: i64,
        task_id: i64,
    },
    CommentAdded {
        project_id: i64,
        comment: Comment,
    },
    CommentUpdated {
        project_id: i64,
        comment: Comment,
    },
    CommentDeleted {
        project_id: i64,
        task_id: i64,
        comment_id: i64,
    },
    TimerStarted {
        project_id: i64,
        entry: TimeEntry,
    },
    TimerStopped {
        project_id: i64,
        entry: TimeEntry,
    },
    TimeEntryCreated {
        project_id: i64,
        entry: TimeEntry,
    },
    TimeEntryDeleted {
        project_id: i64,
        task_id: i64,
        entry_id: i64,
    },
    NotificationCreated {
        notification: Notification,
    },
    /// `notification_id` is `None` when every notification was marked read.
    NotificationsRead {
        user_id: i64,
        notification_id: Option<i64>,
    },
    NotificationDeleted {
        user_id: i64,
        notification_id: i64,
    },
    ProfileUpdated {
        user: User,
    },
}

/// Who an event is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Project(i64),
    User(i64),
}

impl Event {
    pub fn audience(&self) -> Audience {
        match self {
            Event::ProjectCreated { project } | Event::ProjectUpdated { project } => {
                Audience::Project(project.id)
            }
            Event::ProjectDeleted { project_id }
            | Event::MemberRemoved { project_id, .. }
            | Event::TaskMoved { project_id, .. }
            | Event::TaskDeleted { project_id, .. }
            | Event::CommentAdded { project_id, .. }
            | Event::CommentUpdated { project_id, .. }
            | Event::CommentDeleted { project_id, .. }
            | Event::TimerStarted { project_id, .. }
            | Event::TimerStopped { project_id, .. }
            | Event::TimeEntryCreated { project_id, .. }
            | Event::TimeEntryDeleted { project_id, .. } => Audience::Project(*project_id),
            Event::MemberAdded { member } | Event::MemberUpdated { member } => {
                Audience::Project(member.project_id)
            }
            Event::TaskCreated { task } | Event::TaskUpdated { task } => {
                Audience::Project(task.project_id)
            }
            Event::NotificationCreated { notification } => Audience::User(notification.user_id),
            Event::NotificationsRead { user_id, .. }
            | Event::NotificationDeleted { user_id, .. } => Audience::User(*user_id),
            Event::ProfileUpdated { user } => Audience::User(user.id),
        }
    }
}

/// Publish an event. Having no connected clients is not an error.
pub fn publish(tx: &broadcast::Sender<Event>, event: Event) {
    let _ = tx.send(event);
}

/// Decide whether `event` goes to the connection of `user_id`, keeping the
/// connection's project set current as memberships change.
pub fn should_forward(event: &Event, user_id: i64, projects: &mut HashSet<i64>) -> bool {
    match event {
        Event::MemberAdded { member } if member.user_id == user_id => {
            projects.insert(member.project_id);
        }
        Event::ProjectCreated { project } if project.owner_id == user_id => {
            projects.insert(project.id);
        }
        _ => {}
    }
    let forward = match event.audience() {
        Audience::User(id) => id == user_id,
        Audience::Project(id) => projects.contains(&id),
    };
    match event {
        Event::MemberRemoved {
            project_id,
            user_id: removed,
        } if *removed == user_id => {
            projects.remove(project_id);
        }
        Event::ProjectDeleted { project_id } => {
            projects.remove(project_id);
        }
        _ => {}
    }
    forward
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws?token=<bearer>`; browsers cannot set headers on upgrade requests.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let token = params
        .token
        .ok_or_else(|| ApiError::Unauthorized("Missing token query parameter".into()))?;
    let caller = auth::authenticate(&state, &token).await?;
    let user_id = caller.id();
    let projects: HashSet<i64> = state
        .db
        .call(move |db| db.member_project_ids(user_id))
        .await?
        .into_iter()
        .collect();
    let rx = state.events.subscribe();
    tracing::debug!(user_id, projects = projects.len(), "websocket subscriber connected");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, projects, rx)))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: i64,
    projects: HashSet<i64>,
    rx: broadcast::Receiver<Event>,
) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, user_id, projects).await;
    tracing::debug!(user_id, "websocket subscriber disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<Event>,
    user_id: i64,
    mut projects: HashSet<i64>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !should_forward(&event, user_id, &mut projects) {
                            continue;
                        }
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "websocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────
