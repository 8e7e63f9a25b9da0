use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind half of a polymorphic owner/creator reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Task,
    ConversationEntry,
    AgentRun,
    User,
    App,
}

/// A reference to the entity that owns or created a record. Work units of
/// different kinds can own completions and tool invocations, so ownership
/// is a tagged reference rather than a shared base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: Uuid,
}

impl SourceRef {
    pub fn new(kind: SourceKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn task(id: Uuid) -> Self {
        Self::new(SourceKind::Task, id)
    }

    pub fn conversation_entry(id: Uuid) -> Self {
        Self::new(SourceKind::ConversationEntry, id)
    }

    pub fn agent_run(id: Uuid) -> Self {
        Self::new(SourceKind::AgentRun, id)
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(SourceKind::User, id)
    }

    pub fn app(id: Uuid) -> Self {
        Self::new(SourceKind::App, id)
    }
}
