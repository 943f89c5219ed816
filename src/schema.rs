//! Catalog record types and request payloads.
//!
//! Field names match the JSON the single-page client exchanges with the API:
//! snake_case columns plus camelCase timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::tree::TreeRecord;

/// A process row as stored and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: i64,
    pub parent_process_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub area_id: Option<i64>,
    pub related_tools: Option<String>,
    pub related_users: Option<String>,
    pub status: String,
    pub priority: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl TreeRecord for Process {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_process_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A flat grouping label attached to processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Every writable process column, already validated.
///
/// Used for both inserts and full-row updates; the store stamps timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessFields {
    pub name: String,
    pub parent_process_id: Option<i64>,
    pub description: Option<String>,
    pub area_id: Option<i64>,
    pub related_tools: Option<String>,
    pub related_users: Option<String>,
    pub status: String,
    pub priority: String,
}

impl From<&Process> for ProcessFields {
    fn from(p: &Process) -> Self {
        Self {
            name: p.name.clone(),
            parent_process_id: p.parent_process_id,
            description: p.description.clone(),
            area_id: p.area_id,
            related_tools: p.related_tools.clone(),
            related_users: p.related_users.clone(),
            status: p.status.clone(),
            priority: p.priority.clone(),
        }
    }
}

/// Body of `POST /api/processes`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateProcessRequest {
    pub name: Option<String>,
    pub area_id: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub description: Option<String>,
    pub parent_process_id: Option<i64>,
    pub related_tools: Option<String>,
    pub related_users: Option<String>,
}

/// Body of `PUT /api/processes/:id`.
///
/// Absent fields keep their stored value. The nullable columns use a nested
/// option so an explicit `null` clears the value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProcessRequest {
    pub name: Option<String>,
    pub area_id: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub parent_process_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub related_tools: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub related_users: Option<Option<String>>,
}

impl UpdateProcessRequest {
    /// True when a required field was sent as an empty string.
    pub fn has_blank_required(&self) -> bool {
        [&self.name, &self.status, &self.priority]
            .iter()
            .any(|f| f.as_deref().is_some_and(|s| s.trim().is_empty()))
    }

    /// Overlay this patch onto the stored row.
    pub fn apply(self, current: &Process) -> ProcessFields {
        let mut fields = ProcessFields::from(current);
        if let Some(name) = self.name {
            fields.name = name;
        }
        if let Some(area_id) = self.area_id {
            fields.area_id = Some(area_id);
        }
        if let Some(status) = self.status {
            fields.status = status;
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if let Some(description) = self.description {
            fields.description = description;
        }
        if let Some(parent) = self.parent_process_id {
            fields.parent_process_id = parent;
        }
        if let Some(tools) = self.related_tools {
            fields.related_tools = tools;
        }
        if let Some(users) = self.related_users {
            fields.related_users = users;
        }
        fields
    }
}

/// Body of `POST /api/areas` and `PUT /api/areas/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct AreaRequest {
    pub name: Option<String>,
}

/// Marks a field as present, keeping `null` distinct from absent.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
