use std::sync::Arc;
use std::time::{Duration, SystemTime};

use coderoom_protocol::{
    CursorPosition, ExecutionResult, Participant, ParticipantId, ServerMessage, SessionId,
    SessionInfo, TreeSnapshot,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::broker::{EventBus, Subscription};
use crate::epoch_ms;
use crate::error::CoderoomError;
use crate::tree::{TreeEvent, WorkspaceTree};

const DEFAULT_EVENT_CAPACITY: usize = 256;
const SESSION_TOKEN_LEN: usize = 8;

/// Settings applied to every session the registry creates.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub event_capacity: usize,
    pub default_file_name: String,
    pub default_file_content: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_file_name: "main.js".to_string(),
            default_file_content:
                "// Welcome to the collaborative code editor!\nconsole.log(\"Hello, World!\");"
                    .to_string(),
        }
    }
}

/// A mutation requested by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOp {
    CreateFile { path: String, content: String },
    CreateFolder { path: String },
    UpdateContent { path: String, content: String },
    Delete { path: String },
    Rename { old_path: String, new_path: String },
    ToggleFolder { path: String },
}

impl TreeOp {
    fn apply(self, tree: &mut WorkspaceTree) -> Option<TreeEvent> {
        match self {
            TreeOp::CreateFile { path, content } => tree.create_file(&path, content),
            TreeOp::CreateFolder { path } => tree.create_folder(&path),
            TreeOp::UpdateContent { path, content } => tree.update_content(&path, content),
            TreeOp::Delete { path } => tree.delete(&path),
            TreeOp::Rename { old_path, new_path } => tree.rename(&old_path, &new_path),
            TreeOp::ToggleFolder { path } => tree.toggle_folder(&path),
        }
    }
}

struct SessionState {
    participants: Vec<Participant>,
    tree: WorkspaceTree,
    /// Set under the lock when the last participant leaves. A session that is
    /// closed never reopens; late lookups treat it as missing.
    closed: bool,
}

impl SessionState {
    fn has_participant(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == participant_id)
    }
}

/// One collaborative room: roster, workspace tree and event bus.
///
/// Every mutation takes `state`'s lock and publishes while still holding it,
/// so each participant sees events in apply order.
pub struct Session {
    id: SessionId,
    created_at: SystemTime,
    bus: EventBus,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: SessionId, config: &RegistryConfig) -> Self {
        Self {
            id,
            created_at: SystemTime::now(),
            bus: EventBus::new(config.event_capacity),
            state: Mutex::new(SessionState {
                participants: Vec::new(),
                tree: WorkspaceTree::seeded(
                    &config.default_file_name,
                    &config.default_file_content,
                ),
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn open_state(&self) -> Result<MutexGuard<'_, SessionState>, CoderoomError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(CoderoomError::SessionNotFound(self.id.clone()));
        }
        Ok(state)
    }

    /// Current tree contents.
    pub async fn snapshot(&self) -> Result<TreeSnapshot, CoderoomError> {
        Ok(self.open_state().await?.tree.snapshot())
    }

    pub async fn participants(&self) -> Result<Vec<Participant>, CoderoomError> {
        Ok(self.open_state().await?.participants.clone())
    }
}

/// What a participant receives synchronously on join.
#[derive(Debug)]
pub struct Joined {
    pub participant: Participant,
    pub snapshot: TreeSnapshot,
    pub roster: Vec<Participant>,
    /// Events applied after `snapshot`, starting with the very next one.
    pub subscription: Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left { remaining: usize },
    /// The participant was the last one; the session no longer exists.
    Destroyed,
    NotPresent,
}

/// All live sessions. Constructed once and shared by `Arc`.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Create a session seeded with the default file and return its id.
    pub fn create_session(&self) -> SessionId {
        loop {
            let candidate = new_session_token();
            match self.sessions.entry(candidate.clone()) {
                Entry::Occupied(_) => {
                    debug!(session_id = %candidate, "session id collision, retrying");
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Session::new(candidate.clone(), &self.config)));
                    info!(session_id = %candidate, "session created");
                    return candidate;
                }
            }
        }
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Session>, CoderoomError> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoderoomError::SessionNotFound(session_id.to_string()))
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo, CoderoomError> {
        let session = self.get_session(session_id)?;
        let state = session.open_state().await?;
        Ok(SessionInfo {
            id: session.id.clone(),
            created_at_epoch_ms: epoch_ms(session.created_at),
            participants: state.participants.clone(),
            entry_count: state.tree.len(),
        })
    }

    /// Register a participant and hand back the current state plus a live
    /// subscription. Everyone else gets the new roster.
    pub async fn join(&self, session_id: &str, name: &str) -> Result<Joined, CoderoomError> {
        let session = self.get_session(session_id)?;
        let mut state = session.open_state().await?;

        let participant = Participant {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            joined_at_epoch_ms: epoch_ms(SystemTime::now()),
        };
        state.participants.push(participant.clone());

        let subscription = session.bus.subscribe(participant.id.clone());
        let roster = state.participants.clone();
        session.bus.publish(
            ServerMessage::Roster {
                participants: roster.clone(),
                joined: Some(participant.clone()),
                left: None,
            },
            Some(participant.id.as_str()),
        );

        info!(
            session_id = %session.id,
            participant_id = %participant.id,
            name = %participant.name,
            participants = roster.len(),
            "participant joined"
        );

        Ok(Joined {
            snapshot: state.tree.snapshot(),
            roster,
            participant,
            subscription,
        })
    }

    /// Remove a participant; tear the session down when nobody is left.
    pub async fn leave(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<LeaveOutcome, CoderoomError> {
        let session = self.get_session(session_id)?;
        let mut state = session.open_state().await?;

        let before = state.participants.len();
        state.participants.retain(|p| p.id != participant_id);
        if state.participants.len() == before {
            return Ok(LeaveOutcome::NotPresent);
        }

        info!(session_id = %session.id, participant_id, "participant left");

        if state.participants.is_empty() {
            state.closed = true;
            self.sessions
                .remove_if(session_id, |_, live| Arc::ptr_eq(live, &session));
            info!(session_id = %session.id, "session destroyed (empty)");
            return Ok(LeaveOutcome::Destroyed);
        }

        session.bus.publish(
            ServerMessage::Roster {
                participants: state.participants.clone(),
                joined: None,
                left: Some(participant_id.to_string()),
            },
            None,
        );
        Ok(LeaveOutcome::Left {
            remaining: state.participants.len(),
        })
    }

    /// Apply a tree mutation on behalf of `participant_id` and broadcast the
    /// result. Returns `None` when the operation was a silent no-op.
    pub async fn apply(
        &self,
        session_id: &str,
        participant_id: &str,
        op: TreeOp,
    ) -> Result<Option<TreeEvent>, CoderoomError> {
        let session = self.get_session(session_id)?;
        let mut state = session.open_state().await?;
        if !state.has_participant(participant_id) {
            return Err(CoderoomError::NotJoined {
                session_id: session_id.to_string(),
                participant_id: participant_id.to_string(),
            });
        }

        let Some(event) = op.apply(&mut state.tree) else {
            return Ok(None);
        };
        let skip = event.is_edit().then_some(participant_id);
        session.bus.publish(event.clone().into(), skip);
        Ok(Some(event))
    }

    pub async fn move_cursor(
        &self,
        session_id: &str,
        participant_id: &str,
        position: CursorPosition,
    ) -> Result<(), CoderoomError> {
        let session = self.get_session(session_id)?;
        let state = session.open_state().await?;
        let Some(participant) = state.participants.iter().find(|p| p.id == participant_id) else {
            return Err(CoderoomError::NotJoined {
                session_id: session_id.to_string(),
                participant_id: participant_id.to_string(),
            });
        };
        session.bus.publish(
            ServerMessage::CursorMoved {
                participant_id: participant.id.clone(),
                name: participant.name.clone(),
                position,
            },
            Some(participant_id),
        );
        Ok(())
    }

    /// Broadcast a finished run to the session, skipping the requester if known.
    pub async fn publish_run_result(
        &self,
        session_id: &str,
        requester: Option<&ParticipantId>,
        result: ExecutionResult,
    ) -> Result<usize, CoderoomError> {
        let session = self.get_session(session_id)?;
        let _state = session.open_state().await?;
        Ok(session.bus.publish(
            ServerMessage::RunCompleted { result },
            requester.map(String::as_str),
        ))
    }

    /// Tear down sessions older than `max_age` that nobody ever joined.
    ///
    /// A joined session is destroyed by its last leave, so an empty roster on
    /// a live session means it was created and abandoned.
    pub async fn sweep_unjoined(&self, max_age: Duration) -> usize {
        let candidates: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| {
                session.created_at.elapsed().unwrap_or(Duration::ZERO) >= max_age
            })
            .collect();

        let mut swept = 0;
        for session in candidates {
            let mut state = session.state.lock().await;
            if state.closed || !state.participants.is_empty() {
                continue;
            }
            state.closed = true;
            self.sessions
                .remove_if(&session.id, |_, live| Arc::ptr_eq(live, &session));
            debug!(session_id = %session.id, "unjoined session expired");
            swept += 1;
        }
        if swept > 0 {
            info!(swept, remaining = self.sessions.len(), "swept unjoined sessions");
        }
        swept
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn new_session_token() -> SessionId {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(SESSION_TOKEN_LEN);
    token
}
