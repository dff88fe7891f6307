// Data model for a single todo entry

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque task identifier, assigned once at creation and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

/// One todo entry
///
/// Serialized as `{ "id": number, "title": string, "isCompleted": boolean }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub is_completed: bool,
}

impl Task {
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            is_completed: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_completed
    }
}

/// Parse a persisted `"todos"` payload
///
/// Besides being valid JSON, the collection must have unique ids and non-blank
/// titles. Anything else is rejected so the caller can fall back to empty.
pub fn decode_collection(raw: &str) -> Result<Vec<Task>, String> {
    let tasks: Vec<Task> = serde_json::from_str(raw).map_err(|e| e.to_string())?;

    let mut seen = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if !seen.insert(task.id) {
            return Err(format!("duplicate task id {}", task.id));
        }
        if task.title.trim().is_empty() {
            return Err(format!("task {} has a blank title", task.id));
        }
    }

    if next_id_after(&tasks).is_none() {
        return Err("task ids exhausted".to_string());
    }

    Ok(tasks)
}

/// Serialize a collection into its persisted `"todos"` form
pub fn encode_collection(tasks: &[Task]) -> serde_json::Result<String> {
    serde_json::to_string(tasks)
}

/// First id that is safe to hand out after `tasks`, `None` once ids run out
pub fn next_id_after(tasks: &[Task]) -> Option<u64> {
    match tasks.iter().map(|t| t.id.0).max() {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}
