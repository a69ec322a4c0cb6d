// ==========================================
// 管道施工进度引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键级联删除依赖 foreign_keys)
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建库脚本集中在此处, 与 CURRENT_SCHEMA_VERSION 对齐
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表 (幂等)
///
/// 已是当前版本时不做任何事; 版本更高时只告警不降级
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    match read_schema_version(conn)? {
        Some(v) if v == CURRENT_SCHEMA_VERSION => return Ok(()),
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                db_version = v,
                expected = CURRENT_SCHEMA_VERSION,
                "数据库 schema 版本高于当前程序, 请确认程序版本"
            );
            return Ok(());
        }
        _ => {}
    }

    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        [CURRENT_SCHEMA_VERSION],
    )?;
    tracing::info!(version = CURRENT_SCHEMA_VERSION, "数据库 schema 已初始化");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS component (
    component_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    component_type TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    budgeted_mh REAL,
    current_milestones TEXT NOT NULL DEFAULT '{}',
    percent_complete REAL NOT NULL DEFAULT 0,
    is_retired INTEGER NOT NULL DEFAULT 0,
    area_id TEXT,
    system_id TEXT,
    test_package_id TEXT,
    drawing_id TEXT,
    welder_id TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    UNIQUE (project_id, component_type, identity_key)
);
CREATE INDEX IF NOT EXISTS idx_component_project ON component (project_id, is_retired);

CREATE TABLE IF NOT EXISTS milestone_definition (
    component_type TEXT NOT NULL,
    version INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    milestone TEXT NOT NULL,
    weight REAL NOT NULL,
    kind TEXT NOT NULL,
    category TEXT NOT NULL,
    aliases TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (component_type, version, milestone)
);

CREATE TABLE IF NOT EXISTS milestone_event (
    event_id TEXT PRIMARY KEY,
    component_id TEXT NOT NULL REFERENCES component (component_id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    milestone_name TEXT NOT NULL,
    previous_value TEXT,
    new_value TEXT,
    delta_mh REAL NOT NULL,
    category TEXT,
    actor TEXT NOT NULL,
    event_ts TEXT NOT NULL,
    UNIQUE (component_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_event_component ON milestone_event (component_id, event_ts, sequence);
CREATE INDEX IF NOT EXISTS idx_event_project ON milestone_event (project_id, event_ts);

CREATE TABLE IF NOT EXISTS dimension_label (
    project_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    key TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (project_id, dimension, key)
);

CREATE TABLE IF NOT EXISTS progress_view (
    project_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    key TEXT NOT NULL,
    label TEXT,
    component_count INTEGER NOT NULL,
    budget_mh REAL NOT NULL,
    earned_mh REAL NOT NULL,
    earned_receive_mh REAL NOT NULL,
    earned_install_mh REAL NOT NULL,
    earned_punch_mh REAL NOT NULL,
    earned_test_mh REAL NOT NULL,
    earned_restore_mh REAL NOT NULL,
    refreshed_at TEXT NOT NULL,
    PRIMARY KEY (project_id, dimension, key)
);

CREATE TABLE IF NOT EXISTS audit_checkpoint (
    project_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_id, dimension)
);

CREATE TABLE IF NOT EXISTS repair_log (
    repair_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    component_id TEXT NOT NULL,
    old_percent REAL NOT NULL,
    new_percent REAL NOT NULL,
    actor TEXT NOT NULL,
    reason TEXT NOT NULL,
    repaired_at TEXT NOT NULL
);
"#;
