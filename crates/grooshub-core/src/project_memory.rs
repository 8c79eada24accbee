//! Per-project memory: explicit numeric values plus confidence-scored notes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::crypto::Encryptor;
use crate::error::{GroosHubError, Result};
use crate::merge::{self, MergeReport};
use crate::model::{ProjectDelta, ProjectMemory, SoftContextEntry};
use crate::storage::{ProjectMemoryRow, StorageBackend};

/// Result of a write through [`ProjectMemoryStore`].
#[derive(Debug, Clone)]
pub struct ProjectWrite {
    pub memory: ProjectMemory,
    pub merge: MergeReport,
    pub hard_values_set: usize,
    /// Hard values that were skipped (empty name or non-finite value).
    pub rejected: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectPayload {
    #[serde(default)]
    hard_values: BTreeMap<String, f64>,
    #[serde(default)]
    soft_context: Vec<SoftContextEntry>,
}

/// Render project memory as a system-prompt block. Empty memories render as "".
pub fn format_for_prompt(memory: &ProjectMemory) -> String {
    if memory.is_empty() {
        return String::new();
    }

    let mut out = String::from("## About this project\n");
    if !memory.hard_values.is_empty() {
        out.push_str("Known values:\n");
        for (name, value) in &memory.hard_values {
            out.push_str(&format!("- {name} = {value}\n"));
        }
    }
    if !memory.soft_context.is_empty() {
        let mut entries: Vec<&SoftContextEntry> = memory.soft_context.iter().collect();
        entries.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if !memory.hard_values.is_empty() {
            out.push('\n');
        }
        out.push_str("Context:\n");
        for entry in entries {
            out.push_str(&format!("- [{}] {}\n", entry.category, entry.text));
        }
    }
    out
}

fn validate_hard_value(name: &str, value: f64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GroosHubError::InvalidInput(
            "hard value name cannot be empty".into(),
        ));
    }
    if !value.is_finite() {
        return Err(GroosHubError::InvalidInput(format!(
            "hard value {name} must be a finite number, got {value}"
        )));
    }
    Ok(())
}

pub struct ProjectMemoryStore<'a, S: StorageBackend> {
    storage: &'a S,
    encryptor: &'a Encryptor,
    config: &'a MemoryConfig,
}

impl<'a, S: StorageBackend> ProjectMemoryStore<'a, S> {
    pub fn new(storage: &'a S, encryptor: &'a Encryptor, config: &'a MemoryConfig) -> Self {
        Self {
            storage,
            encryptor,
            config,
        }
    }

    pub async fn get(&self, project_id: &str) -> Result<Option<ProjectMemory>> {
        let Some(row) = self.storage.get_project_memory(project_id).await? else {
            return Ok(None);
        };
        let payload: ProjectPayload = self
            .encryptor
            .open_json(&row.payload, row.is_encrypted, &row.org_id)?;
        Ok(Some(ProjectMemory {
            project_id: row.project_id,
            org_id: row.org_id,
            hard_values: payload.hard_values,
            soft_context: payload.soft_context,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    pub async fn get_or_default(&self, project_id: &str, org_id: &str) -> Result<ProjectMemory> {
        if project_id.trim().is_empty() {
            return Err(GroosHubError::InvalidInput("project id cannot be empty".into()));
        }
        let memory = self
            .get(project_id)
            .await?
            .unwrap_or_else(|| ProjectMemory::new(project_id.to_string(), org_id.to_string()));
        if memory.org_id != org_id {
            return Err(GroosHubError::InvalidInput(format!(
                "project {project_id} belongs to organization {}, not {org_id}",
                memory.org_id
            )));
        }
        Ok(memory)
    }

    pub async fn set_hard_value(
        &self,
        project_id: &str,
        org_id: &str,
        name: &str,
        value: f64,
    ) -> Result<ProjectMemory> {
        validate_hard_value(name, value)?;
        let mut memory = self.get_or_default(project_id, org_id).await?;
        memory.hard_values.insert(name.trim().to_string(), value);
        self.save(&mut memory).await?;
        tracing::info!(project_id, name = name.trim(), value, "project hard value set");
        Ok(memory)
    }

    pub async fn remove_hard_value(&self, project_id: &str, name: &str) -> Result<bool> {
        let Some(mut memory) = self.get(project_id).await? else {
            return Ok(false);
        };
        if memory.hard_values.remove(name.trim()).is_none() {
            return Ok(false);
        }
        self.save(&mut memory).await?;
        tracing::info!(project_id, name = name.trim(), "project hard value removed");
        Ok(true)
    }

    /// Add one soft-context entry, reinforcing an equal entry if present.
    pub async fn add_soft_context(
        &self,
        project_id: &str,
        org_id: &str,
        entry: SoftContextEntry,
    ) -> Result<ProjectWrite> {
        if entry.text.trim().is_empty() {
            return Err(GroosHubError::InvalidInput(
                "soft context text cannot be empty".into(),
            ));
        }
        let delta = ProjectDelta {
            soft_context: vec![entry],
            ..Default::default()
        };
        self.apply_delta(project_id, org_id, delta).await
    }

    pub async fn remove_soft_context(&self, project_id: &str, entry_id: Uuid) -> Result<bool> {
        let Some(mut memory) = self.get(project_id).await? else {
            return Ok(false);
        };
        let before = memory.soft_context.len();
        memory.soft_context.retain(|e| e.id != entry_id);
        if memory.soft_context.len() == before {
            return Ok(false);
        }
        self.save(&mut memory).await?;
        tracing::info!(project_id, %entry_id, "project soft context removed");
        Ok(true)
    }

    /// Merge hard values and soft context. Invalid hard values are skipped
    /// and reported rather than failing the whole delta.
    pub async fn apply_delta(
        &self,
        project_id: &str,
        org_id: &str,
        delta: ProjectDelta,
    ) -> Result<ProjectWrite> {
        let mut memory = self.get_or_default(project_id, org_id).await?;

        let mut hard_values_set = 0;
        let mut rejected = Vec::new();
        for (name, value) in delta.hard_values {
            match validate_hard_value(&name, value) {
                Ok(()) => {
                    memory.hard_values.insert(name.trim().to_string(), value);
                    hard_values_set += 1;
                }
                Err(e) => {
                    tracing::warn!(project_id, error = %e, "skipping hard value");
                    rejected.push(name);
                }
            }
        }

        let mut report = merge::merge_soft_context(&mut memory.soft_context, delta.soft_context);
        report.removed +=
            merge::cap_soft_context(&mut memory.soft_context, self.config.max_project_context);

        self.save(&mut memory).await?;
        tracing::info!(
            project_id,
            hard_values_set,
            soft_changed = report.changed(),
            entries = memory.soft_context.len(),
            "project memory updated"
        );

        Ok(ProjectWrite {
            memory,
            merge: report,
            hard_values_set,
            rejected,
        })
    }

    async fn save(&self, memory: &mut ProjectMemory) -> Result<()> {
        memory.updated_at = Utc::now();
        let payload = ProjectPayload {
            hard_values: memory.hard_values.clone(),
            soft_context: memory.soft_context.clone(),
        };
        let sealed = self.encryptor.seal_json(&payload, &memory.org_id)?;
        self.storage
            .save_project_memory(&ProjectMemoryRow {
                project_id: memory.project_id.clone(),
                org_id: memory.org_id.clone(),
                payload: sealed.data,
                is_encrypted: sealed.encrypted,
                created_at: memory.created_at,
                updated_at: memory.updated_at,
            })
            .await
    }
}
