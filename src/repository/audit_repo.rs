// ==========================================
// 管道施工进度引擎 - 审计断点与修复日志仓储
// ==========================================
// 表: audit_checkpoint (每个 项目+维度 只保留一个断点)
// 表: repair_log (只追加)
// 红线: 修复写入 (缓存百分比 + 修复日志) 必须在同一事务内
// ==========================================

use crate::domain::audit::{AuditCheckpoint, RepairRecord};
use crate::domain::types::DimensionKind;
use crate::repository::component_repo::ComponentRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{format_ts, parse_json, parse_ts};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};

pub struct AuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 审计断点
    // ==========================================

    pub fn save_checkpoint(&self, checkpoint: &AuditCheckpoint) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO audit_checkpoint (project_id, dimension, run_id, payload_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (project_id, dimension) DO UPDATE SET
                run_id = excluded.run_id,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at
            "#,
            params![
                checkpoint.project_id,
                checkpoint.dimension.as_str(),
                checkpoint.run_id,
                serde_json::to_string(checkpoint)?,
                format_ts(&checkpoint.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_checkpoint(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Option<AuditCheckpoint>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM audit_checkpoint WHERE project_id = ?1 AND dimension = ?2",
        )?;
        match stmt.query_row(params![project_id, dimension.as_str()], |row| {
            let payload: String = row.get(0)?;
            parse_json::<AuditCheckpoint>(0, &payload)
        }) {
            Ok(cp) => Ok(Some(cp)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_checkpoint(&self, project_id: &str, dimension: DimensionKind) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM audit_checkpoint WHERE project_id = ?1 AND dimension = ?2",
            params![project_id, dimension.as_str()],
        )?;
        Ok(())
    }

    // ==========================================
    // 修复日志
    // ==========================================

    /// 应用修复: 改写缓存百分比 + 写修复日志 (单事务)
    pub fn apply_repairs(&self, records: &[RepairRecord]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            let updated = ComponentRepository::set_percent_on(&tx, &record.component_id, record.new_percent)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "Component".to_string(),
                    id: record.component_id.clone(),
                });
            }
            tx.execute(
                r#"
                INSERT INTO repair_log (
                    repair_id, project_id, component_id, old_percent, new_percent,
                    actor, reason, repaired_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    record.repair_id,
                    record.project_id,
                    record.component_id,
                    record.old_percent,
                    record.new_percent,
                    record.actor,
                    record.reason,
                    format_ts(&record.repaired_at),
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn find_repairs(&self, project_id: &str) -> RepositoryResult<Vec<RepairRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT repair_id, project_id, component_id, old_percent, new_percent,
                   actor, reason, repaired_at
            FROM repair_log
            WHERE project_id = ?1
            ORDER BY repaired_at, repair_id
            "#,
        )?;
        let records = stmt
            .query_map(params![project_id], |row| {
                let repaired_at: String = row.get(7)?;
                Ok(RepairRecord {
                    repair_id: row.get(0)?,
                    project_id: row.get(1)?,
                    component_id: row.get(2)?,
                    old_percent: row.get(3)?,
                    new_percent: row.get(4)?,
                    actor: row.get(5)?,
                    reason: row.get(6)?,
                    repaired_at: parse_ts(7, &repaired_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }
}
