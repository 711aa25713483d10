use anyhow::Context;
use sqlx::SqlitePool;

const SCHEMA: &str = "
    -- Core records
    CREATE TABLE IF NOT EXISTS memories (
        id               TEXT PRIMARY KEY,
        layer            TEXT NOT NULL CHECK (layer IN
                            ('working', 'episodic', 'semantic', 'procedural', 'reflective')),
        content          TEXT NOT NULL,
        embedding        BLOB,
        embedding_model  TEXT,
        importance       REAL NOT NULL DEFAULT 0.5 CHECK (importance BETWEEN 0.0 AND 1.0),
        emotional_weight REAL NOT NULL DEFAULT 1.0,
        access_count     INTEGER NOT NULL DEFAULT 0,
        last_accessed_at TEXT,
        consolidated     INTEGER NOT NULL DEFAULT 0,
        retention_score  REAL NOT NULL DEFAULT 1.0,
        self_metadata    TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL,
        expires_at       TEXT,
        deleted_at       TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_memories_layer ON memories(layer);
    CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
    CREATE INDEX IF NOT EXISTS idx_memories_expires ON memories(expires_at)
        WHERE expires_at IS NOT NULL;

    -- FTS5 full-text search (BM25 scoring)
    CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
        content, content=memories, content_rowid=rowid, tokenize='porter unicode61'
    );

    -- Keep the index in sync with record content only
    CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
        INSERT INTO memories_fts(rowid, content) VALUES (new.rowid, new.content);
    END;
    CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
        INSERT INTO memories_fts(memories_fts, rowid, content)
        VALUES ('delete', old.rowid, old.content);
    END;
    CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE OF content ON memories BEGIN
        INSERT INTO memories_fts(memories_fts, rowid, content)
        VALUES ('delete', old.rowid, old.content);
        INSERT INTO memories_fts(rowid, content) VALUES (new.rowid, new.content);
    END;

    -- Tags
    CREATE TABLE IF NOT EXISTS tags (
        id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS memory_tags (
        memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
        tag_id    INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (memory_id, tag_id)
    );
    CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);

    -- Record-to-record links, endpoints stored with source_id <= target_id
    CREATE TABLE IF NOT EXISTS memory_associations (
        source_id         TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
        target_id         TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
        association_type  TEXT NOT NULL,
        strength          REAL NOT NULL CHECK (strength BETWEEN 0.0 AND 1.0),
        activation_count  INTEGER NOT NULL DEFAULT 0,
        last_activated_at TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL,
        PRIMARY KEY (source_id, target_id, association_type),
        CHECK (source_id <= target_id)
    );
    CREATE INDEX IF NOT EXISTS idx_assoc_target ON memory_associations(target_id);

    -- Lifecycle log
    CREATE TABLE IF NOT EXISTS memory_events (
        event_id    TEXT PRIMARY KEY,
        memory_id   TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        detail      TEXT,
        occurred_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_memory_events_memory
        ON memory_events(memory_id, occurred_at);

    -- Embedding cache with LRU eviction
    CREATE TABLE IF NOT EXISTS embedding_cache (
        content_hash TEXT PRIMARY KEY,
        model        TEXT NOT NULL,
        embedding    BLOB NOT NULL,
        created_at   TEXT NOT NULL,
        accessed_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_accessed ON embedding_cache(accessed_at);
";

pub(super) async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("initialize memory schema")?;
    Ok(())
}
