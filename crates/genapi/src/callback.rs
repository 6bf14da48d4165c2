//! Extraction of the task reference from completion-callback payloads.
//!
//! Callback bodies vary across service versions even more than status
//! responses do. Extraction is an ordered list of typed extractors, each
//! returning `Option<TaskRef>`; the first success wins. A payload no
//! extractor matches is NOT an error at the HTTP layer: the route still
//! acknowledges (returning an error status triggers retry storms from the
//! service, which is strictly worse than dropping one malformed
//! notification).

use serde_json::Value;

use crate::status::TaskStatus;

/// A task reference recovered from a callback payload, plus whatever
/// status information rode along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRef {
    /// The generation service's task id.
    pub task_id: String,
    /// Status carried in the callback body, when the shape includes one.
    /// `None` means the caller must poll for the authoritative status.
    pub status: Option<TaskStatus>,
}

/// Try every known callback shape in order; first success wins.
pub fn extract_task_ref(payload: &Value) -> Option<TaskRef> {
    const EXTRACTORS: &[fn(&Value) -> Option<TaskRef>] = &[
        extract_flat,
        extract_data_wrapped,
        extract_task_object,
        extract_legacy_id,
    ];
    EXTRACTORS.iter().find_map(|extract| extract(payload))
}

/// Read a task id that some versions send as a bare number.
fn id_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shape 1: `{"task_id": "...", "status": "...", ...}`.
fn extract_flat(payload: &Value) -> Option<TaskRef> {
    let task_id = id_from(payload.get("task_id")?)?;
    Some(TaskRef {
        task_id,
        status: TaskStatus::from_payload(payload),
    })
}

/// Shape 2: `{"data": {"task_id": "...", "status": "...", ...}}`.
fn extract_data_wrapped(payload: &Value) -> Option<TaskRef> {
    let data = payload.get("data")?;
    let task_id = id_from(data.get("task_id").or_else(|| data.get("id"))?)?;
    Some(TaskRef {
        task_id,
        status: TaskStatus::from_payload(payload),
    })
}

/// Shape 3: `{"task": {"id": "...", "state": "...", ...}}`.
fn extract_task_object(payload: &Value) -> Option<TaskRef> {
    let task = payload.get("task")?;
    let task_id = id_from(task.get("id")?)?;
    Some(TaskRef {
        task_id,
        status: TaskStatus::from_payload(payload),
    })
}

/// Shape 4 (legacy): `{"id": "...", ...}` with no status at all.
fn extract_legacy_id(payload: &Value) -> Option<TaskRef> {
    let task_id = id_from(payload.get("id")?)?;
    Some(TaskRef {
        task_id,
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_callback_carries_id_and_status() {
        let payload = json!({"task_id": "t-1", "status": "done", "result": {"url": "u"}});
        let task_ref = extract_task_ref(&payload).unwrap();
        assert_eq!(task_ref.task_id, "t-1");
        assert_eq!(task_ref.status, Some(TaskStatus::Done(json!({"url": "u"}))));
    }

    #[test]
    fn wrapped_and_nested_shapes_are_recognized() {
        let wrapped = json!({"data": {"task_id": "t-2", "status": "failed", "error": "boom"}});
        assert_eq!(extract_task_ref(&wrapped).unwrap().task_id, "t-2");

        let nested = json!({"task": {"id": "t-3", "state": "running"}});
        let task_ref = extract_task_ref(&nested).unwrap();
        assert_eq!(task_ref.task_id, "t-3");
        assert_eq!(task_ref.status, Some(TaskStatus::Processing));
    }

    #[test]
    fn legacy_bare_id_is_recognized_without_status() {
        let payload = json!({"id": "t-4"});
        let task_ref = extract_task_ref(&payload).unwrap();
        assert_eq!(task_ref.task_id, "t-4");
        assert_eq!(task_ref.status, None);
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let payload = json!({"task_id": 90210, "status": "pending"});
        assert_eq!(extract_task_ref(&payload).unwrap().task_id, "90210");
    }

    #[test]
    fn payload_with_no_reference_anywhere_yields_none() {
        for payload in [
            json!({}),
            json!({"event": "ping"}),
            json!({"data": {"progress": 55}}),
            json!({"task": {"state": "running"}}),
            json!(null),
            json!([1, 2, 3]),
        ] {
            assert_eq!(extract_task_ref(&payload), None, "{payload}");
        }
    }

    #[test]
    fn extractor_order_prefers_the_most_specific_shape() {
        // A payload carrying both a flat task_id and a legacy id: the flat
        // extractor runs first.
        let payload = json!({"task_id": "t-new", "id": "t-old"});
        assert_eq!(extract_task_ref(&payload).unwrap().task_id, "t-new");
    }
}
