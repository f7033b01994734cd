use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Execution,
    Preview,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Execution => "execution",
            ContainerKind::Preview => "preview",
        }
    }
}

/// Lifecycle status. Moves forward only:
/// `Starting -> Running -> (Stopped | Failed | Expired)`, and `Starting` may
/// go straight to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    Expired,
}

impl ContainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Stopped | ContainerStatus::Failed | ContainerStatus::Expired
        )
    }

    /// Re-asserting the current status is allowed; leaving a terminal one is not.
    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            ContainerStatus::Starting => true,
            ContainerStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// One container the system is responsible for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    /// Engine id; absent until the engine has created the container.
    pub runtime_id: Option<String>,
    pub kind: ContainerKind,
    pub language: String,
    pub framework: Option<String>,
    pub image: String,
    /// Host port; previews only.
    pub port: Option<u16>,
    pub internal_port: Option<u16>,
    pub url: Option<String>,
    pub session_id: Option<String>,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_checked_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(kind: ContainerKind, language: &str, image: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("sandboxd-{}-{}", short_kind(kind), Uuid::new_v4()),
            runtime_id: None,
            kind,
            language: language.to_string(),
            framework: None,
            image: image.to_string(),
            port: None,
            internal_port: None,
            url: None,
            session_id: None,
            status: ContainerStatus::Starting,
            created_at: now,
            expires_at: None,
            last_checked_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Time left before expiry, zero once expired; `None` without an expiry.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires| (expires - now).max(Duration::zero()))
    }

    /// Remaining time as `Xm Ys`.
    pub fn time_remaining_display(&self, now: DateTime<Utc>) -> Option<String> {
        self.time_remaining(now).map(|left| {
            let secs = left.num_seconds();
            format!("{}m {}s", secs / 60, secs % 60)
        })
    }

    /// Whether the record still holds its port and container.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

fn short_kind(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Execution => "exec",
        ContainerKind::Preview => "preview",
    }
}

/// Selection criteria for [`Registry::list`](super::container_registry::Registry::list).
/// Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub kind: Option<ContainerKind>,
    pub status: Option<ContainerStatus>,
    pub session_id: Option<String>,
    pub active_only: bool,
}

impl RecordFilter {
    pub fn kind(kind: ContainerKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn matches(&self, record: &ContainerRecord) -> bool {
        if self.kind.is_some_and(|kind| kind != record.kind) {
            return false;
        }
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if let Some(session) = &self.session_id {
            if record.session_id.as_deref() != Some(session.as_str()) {
                return false;
            }
        }
        !(self.active_only && !record.is_active())
    }
}
