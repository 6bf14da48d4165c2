//! Normalization of version-skewed status payloads.
//!
//! The service has shipped at least three response layouts for the same
//! status query. Each shape gets its own probe; the probes run in a fixed
//! order and the first one that matches wins. A new layout means adding a
//! probe, not patching a traversal.

use serde_json::Value;

/// Internal status of an external generation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued, not started.
    Pending,
    /// Running.
    Processing,
    /// Finished; carries the result payload (output URLs etc.).
    Done(Value),
    /// Failed for a business reason; carries the service's message.
    Failed(String),
}

impl TaskStatus {
    /// Normalize a raw status payload into a [`TaskStatus`].
    ///
    /// Returns `None` when no probe recognizes the shape.
    pub fn from_payload(payload: &Value) -> Option<TaskStatus> {
        const PROBES: &[fn(&Value) -> Option<TaskStatus>] =
            &[probe_flat, probe_data_wrapped, probe_task_state];
        PROBES.iter().find_map(|probe| probe(payload))
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done(_) | TaskStatus::Failed(_))
    }
}

/// Map a status word (shared vocabulary across shapes) plus the surrounding
/// object into a [`TaskStatus`].
fn from_word(word: &str, container: &Value) -> Option<TaskStatus> {
    match word {
        "pending" | "queued" | "waiting" => Some(TaskStatus::Pending),
        "processing" | "running" | "in_progress" | "generating" => Some(TaskStatus::Processing),
        "done" | "succeeded" | "completed" | "success" => {
            let result = container
                .get("result")
                .or_else(|| container.get("output"))
                .cloned()
                .unwrap_or(Value::Null);
            Some(TaskStatus::Done(result))
        }
        "failed" | "error" | "canceled" | "cancelled" => {
            let reason = container
                .get("error")
                .or_else(|| container.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("generation failed")
                .to_string();
            Some(TaskStatus::Failed(reason))
        }
        _ => None,
    }
}

/// Shape 1 (oldest): `{"status": "...", "result": ..., "error": ...}`.
fn probe_flat(payload: &Value) -> Option<TaskStatus> {
    let word = payload.get("status")?.as_str()?;
    from_word(word, payload)
}

/// Shape 2: `{"data": {"status": "...", "output": ...}}`.
fn probe_data_wrapped(payload: &Value) -> Option<TaskStatus> {
    let data = payload.get("data")?;
    let word = data.get("status")?.as_str()?;
    from_word(word, data)
}

/// Shape 3 (newest): `{"task": {"state": "...", "result": ...}}`.
fn probe_task_state(payload: &Value) -> Option<TaskStatus> {
    let task = payload.get("task")?;
    let word = task.get("state")?.as_str()?;
    from_word(word, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn flat_shape_is_recognized() {
        let done = json!({"status": "done", "result": {"url": "https://x/y.png"}});
        assert_eq!(
            TaskStatus::from_payload(&done),
            Some(TaskStatus::Done(json!({"url": "https://x/y.png"})))
        );

        let failed = json!({"status": "failed", "error": "nsfw content"});
        assert_eq!(
            TaskStatus::from_payload(&failed),
            Some(TaskStatus::Failed("nsfw content".into()))
        );
    }

    #[test]
    fn data_wrapped_shape_is_recognized() {
        let payload = json!({"data": {"status": "succeeded", "output": ["https://x/z.png"]}});
        assert_eq!(
            TaskStatus::from_payload(&payload),
            Some(TaskStatus::Done(json!(["https://x/z.png"])))
        );
    }

    #[test]
    fn task_state_shape_is_recognized() {
        let payload = json!({"task": {"state": "running"}});
        assert_eq!(TaskStatus::from_payload(&payload), Some(TaskStatus::Processing));
    }

    #[test]
    fn status_words_are_synonym_tolerant() {
        for word in ["pending", "queued", "waiting"] {
            assert_eq!(
                TaskStatus::from_payload(&json!({"status": word})),
                Some(TaskStatus::Pending),
                "{word}"
            );
        }
        for word in ["processing", "running", "in_progress", "generating"] {
            assert_eq!(
                TaskStatus::from_payload(&json!({"status": word})),
                Some(TaskStatus::Processing),
                "{word}"
            );
        }
    }

    #[test]
    fn earlier_probes_take_precedence() {
        // Both the flat and wrapped shapes are present; the flat one wins.
        let payload = json!({"status": "failed", "data": {"status": "done"}});
        assert_matches!(TaskStatus::from_payload(&payload), Some(TaskStatus::Failed(_)));
    }

    #[test]
    fn unknown_shapes_return_none() {
        assert_eq!(TaskStatus::from_payload(&json!({})), None);
        assert_eq!(TaskStatus::from_payload(&json!({"status": 17})), None);
        assert_eq!(TaskStatus::from_payload(&json!({"status": "weird-word"})), None);
        assert_eq!(TaskStatus::from_payload(&json!("just a string")), None);
    }

    #[test]
    fn failure_without_message_gets_a_generic_reason() {
        assert_eq!(
            TaskStatus::from_payload(&json!({"status": "error"})),
            Some(TaskStatus::Failed("generation failed".into()))
        );
    }
}
