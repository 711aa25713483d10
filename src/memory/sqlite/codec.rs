use crate::memory::associations::{AssociationType, MemoryAssociation};
use crate::memory::types::{MemoryEvent, MemoryEventType, MemoryLayer, MemoryRecord, SelfMetadata};
use crate::memory::vector;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;

/// Column list for [`MemoryRow`]; `m` aliases the `memories` table.
pub(super) const RECORD_COLUMNS: &str = "m.id, m.layer, m.content, m.embedding, m.embedding_model, \
     m.importance, m.emotional_weight, m.access_count, m.last_accessed_at, m.consolidated, \
     m.retention_score, m.self_metadata, m.created_at, m.expires_at, m.deleted_at";

/// Same as [`RECORD_COLUMNS`] without loading the vector blob.
pub(super) const RECORD_COLUMNS_NO_EMBEDDING: &str = "m.id, m.layer, m.content, \
     NULL AS embedding, m.embedding_model, m.importance, m.emotional_weight, m.access_count, \
     m.last_accessed_at, m.consolidated, m.retention_score, m.self_metadata, m.created_at, \
     m.expires_at, m.deleted_at";

#[derive(Debug, sqlx::FromRow)]
pub(super) struct MemoryRow {
    pub id: String,
    pub layer: String,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub importance: f64,
    pub emotional_weight: f64,
    pub access_count: i64,
    pub last_accessed_at: Option<String>,
    pub consolidated: bool,
    pub retention_score: f64,
    pub self_metadata: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct AssociationRow {
    pub source_id: String,
    pub target_id: String,
    pub association_type: String,
    pub strength: f64,
    pub activation_count: i64,
    pub last_activated_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct EventRow {
    pub event_id: String,
    pub memory_id: String,
    pub event_type: String,
    pub detail: Option<String>,
    pub occurred_at: String,
}

/// Fixed-width UTC timestamps so that string comparison in SQL orders by time.
pub(super) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp '{raw}'"))
}

fn parse_optional_timestamp(raw: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

pub(super) fn str_to_layer(raw: &str) -> anyhow::Result<MemoryLayer> {
    MemoryLayer::from_str(raw).with_context(|| format!("unknown memory layer '{raw}'"))
}

pub(super) fn str_to_association_type(raw: &str) -> anyhow::Result<AssociationType> {
    AssociationType::from_str(raw).with_context(|| format!("unknown association type '{raw}'"))
}

pub(super) fn metadata_to_json(metadata: Option<&SelfMetadata>) -> anyhow::Result<Option<String>> {
    metadata
        .map(|m| serde_json::to_string(m).context("encode self metadata"))
        .transpose()
}

pub(super) fn row_to_record(
    row: MemoryRow,
    tags: Vec<String>,
    related_ids: Vec<String>,
) -> anyhow::Result<MemoryRecord> {
    // A corrupt metadata blob only loses the self-assessment, not the record.
    let self_metadata = row
        .self_metadata
        .as_deref()
        .and_then(|raw| serde_json::from_str::<SelfMetadata>(raw).ok());

    Ok(MemoryRecord {
        layer: str_to_layer(&row.layer)?,
        embedding: row.embedding.as_deref().map(vector::bytes_to_vec),
        embedding_model: row.embedding_model,
        importance: row.importance,
        emotional_weight: row.emotional_weight,
        tags,
        related_ids,
        access_count: u64::try_from(row.access_count).unwrap_or(0),
        last_accessed_at: parse_optional_timestamp(row.last_accessed_at.as_deref())?,
        consolidated: row.consolidated,
        retention_score: row.retention_score,
        self_metadata,
        created_at: parse_timestamp(&row.created_at)?,
        expires_at: parse_optional_timestamp(row.expires_at.as_deref())?,
        deleted_at: parse_optional_timestamp(row.deleted_at.as_deref())?,
        content: row.content,
        id: row.id,
    })
}

pub(super) fn row_to_association(row: AssociationRow) -> anyhow::Result<MemoryAssociation> {
    Ok(MemoryAssociation {
        association_type: str_to_association_type(&row.association_type)?,
        strength: row.strength,
        activation_count: u64::try_from(row.activation_count).unwrap_or(0),
        last_activated_at: parse_optional_timestamp(row.last_activated_at.as_deref())?,
        created_at: parse_timestamp(&row.created_at)?,
        source_id: row.source_id,
        target_id: row.target_id,
    })
}

pub(super) fn row_to_event(row: EventRow) -> anyhow::Result<MemoryEvent> {
    Ok(MemoryEvent {
        event_type: MemoryEventType::from_str(&row.event_type)
            .with_context(|| format!("unknown memory event type '{}'", row.event_type))?,
        occurred_at: parse_timestamp(&row.occurred_at)?,
        event_id: row.event_id,
        memory_id: row.memory_id,
        detail: row.detail,
    })
}

/// Appends `(?, ?, ...)` binding every id.
pub(super) fn push_id_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");
}
