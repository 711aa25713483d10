use super::codec::{self, EventRow};
use crate::memory::types::{MemoryEvent, MemoryEventType};
use anyhow::Context;
use sqlx::{SqliteExecutor, SqlitePool};

/// Appends one lifecycle entry. Runs on whatever executor the caller's write uses,
/// so the event commits or rolls back together with the change it describes.
pub(super) async fn record_event<'e, E>(
    executor: E,
    memory_id: &str,
    event_type: MemoryEventType,
    detail: Option<&str>,
    occurred_at: &str,
) -> anyhow::Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO memory_events (event_id, memory_id, event_type, detail, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(memory_id)
    .bind(event_type.to_string())
    .bind(detail)
    .bind(occurred_at)
    .execute(executor)
    .await
    .with_context(|| format!("record {event_type} event for {memory_id}"))?;
    Ok(())
}

pub(super) async fn events_for(pool: &SqlitePool, memory_id: &str) -> anyhow::Result<Vec<MemoryEvent>> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT event_id, memory_id, event_type, detail, occurred_at
         FROM memory_events
         WHERE memory_id = ?1
         ORDER BY occurred_at ASC, rowid ASC",
    )
    .bind(memory_id)
    .fetch_all(pool)
    .await
    .context("fetch memory events")?;

    rows.into_iter().map(codec::row_to_event).collect()
}
