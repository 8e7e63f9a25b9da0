use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::lifecycle::Status;
use crate::models::source::SourceRef;

/// One concrete use of a capability by a work unit. Lifecycle is
/// `pending -> completed | failed` and terminal states never change; the
/// attempted arguments are preserved on failure for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub source: SourceRef,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    pub fn new<S: Into<String>>(source: SourceRef, tool_name: S, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            tool_name: tool_name.into(),
            arguments,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    /// Record the result and mark completed in one step, so a completed
    /// invocation always carries its result.
    pub fn complete(&mut self, result: Value) {
        if self.terminal() {
            return;
        }
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        if !self.terminal() {
            self.failed_at = Some(Utc::now());
        }
    }

    pub fn terminal(&self) -> bool {
        self.completed_at.is_some() || self.failed_at.is_some()
    }

    pub fn status(&self) -> Status {
        if self.completed_at.is_some() {
            Status::Completed
        } else if self.failed_at.is_some() {
            Status::Failed
        } else {
            Status::Pending
        }
    }

    /// The assistant turn describing this invocation when replaying
    /// history to the model.
    pub fn as_model_message(&self) -> String {
        format!(
            "Invoking tool: {} with arguments: {}",
            self.tool_name, self.arguments
        )
    }

    /// The observation text describing the result, if the tool produced
    /// one.
    pub fn observation_message(&self) -> Option<String> {
        self.result
            .as_ref()
            .and_then(|result| serde_json::to_string_pretty(result).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation() -> ToolInvocation {
        ToolInvocation::new(
            SourceRef::task(Uuid::new_v4()),
            "lookup",
            json!({"q": "x"}),
        )
    }

    #[test]
    fn test_complete_records_result_and_timestamp_together() {
        let mut invocation = invocation();
        assert_eq!(invocation.status(), Status::Pending);

        invocation.complete(json!({"found": true}));
        assert_eq!(invocation.status(), Status::Completed);
        assert_eq!(invocation.result, Some(json!({"found": true})));
    }

    #[test]
    fn test_failed_invocation_keeps_arguments_and_stays_failed() {
        let mut invocation = invocation();
        invocation.fail();
        assert_eq!(invocation.status(), Status::Failed);
        assert_eq!(invocation.arguments, json!({"q": "x"}));

        invocation.complete(json!({}));
        assert_eq!(invocation.status(), Status::Failed);
        assert_eq!(invocation.result, None);
    }

    #[test]
    fn test_as_model_message() {
        let invocation = invocation();
        assert_eq!(
            invocation.as_model_message(),
            "Invoking tool: lookup with arguments: {\"q\":\"x\"}"
        );
    }
}
