// ==========================================
// 管道施工进度引擎 - 汇总视图与维度标签仓储
// ==========================================
// 表: progress_view (物化视图, 可随时整体刷新)
// 表: dimension_label (仅用于展示)
// 红线: 视图只是缓存, 不是事实来源
// ==========================================

use crate::domain::dimension::{CategoryAmounts, DimensionMetadata, DimensionTotals, MaterializedViewRow};
use crate::domain::types::DimensionKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{format_ts, parse_enum, parse_ts};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};

pub struct ProgressViewRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressViewRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 整体替换某项目某维度的视图行 (单事务)
    pub fn replace(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        rows: &[MaterializedViewRow],
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM progress_view WHERE project_id = ?1 AND dimension = ?2",
            params![project_id, dimension.as_str()],
        )?;
        let mut count = 0;
        for row in rows {
            let t = &row.totals;
            let c = &t.earned_by_category;
            tx.execute(
                r#"
                INSERT INTO progress_view (
                    project_id, dimension, key, label, component_count, budget_mh, earned_mh,
                    earned_receive_mh, earned_install_mh, earned_punch_mh, earned_test_mh,
                    earned_restore_mh, refreshed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    project_id,
                    dimension.as_str(),
                    t.key,
                    t.label,
                    t.component_count as i64,
                    t.budget_mh,
                    t.earned_mh,
                    c.receive,
                    c.install,
                    c.punch,
                    c.test,
                    c.restore,
                    format_ts(&row.refreshed_at),
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn find(&self, project_id: &str, dimension: DimensionKind) -> RepositoryResult<Vec<MaterializedViewRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT project_id, dimension, key, label, component_count, budget_mh, earned_mh,
                   earned_receive_mh, earned_install_mh, earned_punch_mh, earned_test_mh,
                   earned_restore_mh, refreshed_at
            FROM progress_view
            WHERE project_id = ?1 AND dimension = ?2
            ORDER BY key
            "#,
        )?;
        let rows = stmt
            .query_map(params![project_id, dimension.as_str()], |row| {
                let dim: String = row.get(1)?;
                let count: i64 = row.get(4)?;
                let refreshed_at: String = row.get(12)?;
                Ok(MaterializedViewRow {
                    project_id: row.get(0)?,
                    totals: DimensionTotals {
                        dimension: parse_enum(1, &dim, DimensionKind::from_str)?,
                        key: row.get(2)?,
                        label: row.get(3)?,
                        component_count: count.max(0) as usize,
                        budget_mh: row.get(5)?,
                        earned_mh: row.get(6)?,
                        earned_by_category: CategoryAmounts {
                            receive: row.get(7)?,
                            install: row.get(8)?,
                            punch: row.get(9)?,
                            test: row.get(10)?,
                            restore: row.get(11)?,
                        },
                    },
                    refreshed_at: parse_ts(12, &refreshed_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}

// ==========================================
// DimensionLabelRepository - 维度标签
// ==========================================
pub struct DimensionLabelRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DimensionLabelRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, project_id: &str, dimension: DimensionKind, key: &str, label: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO dimension_label (project_id, dimension, key, label)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (project_id, dimension, key) DO UPDATE SET label = excluded.label
            "#,
            params![project_id, dimension.as_str(), key, label],
        )?;
        Ok(())
    }

    pub fn find_by_project(&self, project_id: &str) -> RepositoryResult<DimensionMetadata> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT dimension, key, label FROM dimension_label WHERE project_id = ?1 ORDER BY dimension, key",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                let dim: String = row.get(0)?;
                Ok((
                    parse_enum(0, &dim, DimensionKind::from_str)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut metadata = DimensionMetadata::default();
        for (dimension, key, label) in rows {
            metadata.insert(dimension, &key, &label);
        }
        Ok(metadata)
    }
}
