//! Inline SQL migrations for the codemem schema, tracked one-at-a-time
//! against `_migrations` rather than shipped as `sqlx::migrate!` files — the
//! schema is small enough that inline statements stay easy to review.

pub const MIGRATIONS: &[&str] = &[
    // 1: sessions
    r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    cwd TEXT,
    project TEXT NOT NULL DEFAULT '',
    user TEXT,
    tool_version TEXT,
    git_remote TEXT,
    git_branch TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at DESC);"#,
    // 2: memory_items
    r#"
CREATE TABLE IF NOT EXISTS memory_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    body_text TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 1.0,
    tags_text TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    metadata TEXT NOT NULL DEFAULT '{}',
    import_key TEXT,
    project TEXT NOT NULL DEFAULT ''
);
"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_memory_items_import_key ON memory_items(import_key) WHERE import_key IS NOT NULL AND active = 1;"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memory_items_session ON memory_items(session_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memory_items_kind ON memory_items(kind);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memory_items_created_at ON memory_items(created_at DESC);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memory_items_project ON memory_items(project);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_memory_items_active ON memory_items(active);"#,
    // 3: replication log
    r#"
CREATE TABLE IF NOT EXISTS replication_ops (
    op_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    origin_device_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    op_type TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}'
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_replication_ops_cursor ON replication_ops(created_at, op_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_replication_ops_origin ON replication_ops(origin_device_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_replication_ops_entity ON replication_ops(entity_type, entity_id);"#,
    // 4: applied-op dedup ledger (entity_type, entity_id, op_id) for idempotent apply
    r#"
CREATE TABLE IF NOT EXISTS applied_ops (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    op_id TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, op_id)
);
"#,
    // 5: peers
    r#"
CREATE TABLE IF NOT EXISTS peers (
    peer_device_id TEXT PRIMARY KEY,
    pinned_fingerprint TEXT NOT NULL,
    public_key TEXT NOT NULL,
    known_addresses TEXT NOT NULL DEFAULT '[]',
    last_success_at TEXT,
    last_success_address TEXT,
    last_applied_cursor TEXT,
    last_acked_cursor TEXT
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS peer_sync_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    peer_device_id TEXT NOT NULL REFERENCES peers(peer_device_id),
    started_at TEXT NOT NULL,
    ok INTEGER NOT NULL,
    error TEXT,
    ops_in INTEGER NOT NULL DEFAULT 0,
    ops_out INTEGER NOT NULL DEFAULT 0
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_peer_sync_attempts_peer ON peer_sync_attempts(peer_device_id, started_at DESC);"#,
    // 6: raw events
    r#"
CREATE TABLE IF NOT EXISTS raw_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    opencode_session_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    event_seq INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    ts_wall_ms INTEGER NOT NULL,
    ts_mono_ms INTEGER NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    payload_hash TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(opencode_session_id, event_id)
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_raw_events_session_status ON raw_events(opencode_session_id, status);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_raw_events_created_at ON raw_events(created_at);"#,
    // 7: raw event session bookkeeping (for sweeper idle/activity tracking and reliability metrics)
    r#"
CREATE TABLE IF NOT EXISTS raw_event_sessions (
    opencode_session_id TEXT PRIMARY KEY,
    started_at TEXT,
    last_activity_at TEXT NOT NULL,
    last_flush_at TEXT,
    pending_count INTEGER NOT NULL DEFAULT 0
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS raw_event_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    opencode_session_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    completed_at TEXT
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_raw_event_batches_status ON raw_event_batches(status, created_at);"#,
    r#"
CREATE TABLE IF NOT EXISTS raw_event_ingest_stats (
    window_start TEXT PRIMARY KEY,
    attempted_events INTEGER NOT NULL DEFAULT 0,
    skipped_duplicate INTEGER NOT NULL DEFAULT 0,
    skipped_conflict INTEGER NOT NULL DEFAULT 0,
    skipped_invalid INTEGER NOT NULL DEFAULT 0,
    inserted_events INTEGER NOT NULL DEFAULT 0
);
"#,
    // 8: usage events
    r#"
CREATE TABLE IF NOT EXISTS usage_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event TEXT NOT NULL,
    project TEXT,
    tokens_read INTEGER NOT NULL DEFAULT 0,
    tokens_saved INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_usage_events_event_project ON usage_events(event, project, created_at DESC);"#,
    // 9: FTS index over memory_items, content-synced via triggers
    r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memory_items_fts USING fts5(
    title, body_text, tags_text, kind,
    content='memory_items', content_rowid='id'
);
"#,
    r#"
CREATE TRIGGER IF NOT EXISTS memory_items_ai AFTER INSERT ON memory_items BEGIN
    INSERT INTO memory_items_fts(rowid, title, body_text, tags_text, kind)
    VALUES (new.id, new.title, new.body_text, new.tags_text, new.kind);
END;
"#,
    r#"
CREATE TRIGGER IF NOT EXISTS memory_items_ad AFTER DELETE ON memory_items BEGIN
    INSERT INTO memory_items_fts(memory_items_fts, rowid, title, body_text, tags_text, kind)
    VALUES ('delete', old.id, old.title, old.body_text, old.tags_text, old.kind);
END;
"#,
    r#"
CREATE TRIGGER IF NOT EXISTS memory_items_au AFTER UPDATE ON memory_items BEGIN
    INSERT INTO memory_items_fts(memory_items_fts, rowid, title, body_text, tags_text, kind)
    VALUES ('delete', old.id, old.title, old.body_text, old.tags_text, old.kind);
    INSERT INTO memory_items_fts(rowid, title, body_text, tags_text, kind)
    VALUES (new.id, new.title, new.body_text, new.tags_text, new.kind);
END;
"#,
];
