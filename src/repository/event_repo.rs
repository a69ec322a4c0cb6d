// ==========================================
// 管道施工进度引擎 - 里程碑事件仓储
// ==========================================
// 表: milestone_event (只追加)
// 红线: 事件不提供更新接口; 删除只经由构件删除的外键级联
// 排序: (event_ts, sequence)
// ==========================================

use crate::domain::component::UNASSIGNED_DIMENSION_KEY;
use crate::domain::milestone::{EventScope, MilestoneEvent};
use crate::domain::types::{DimensionKind, StandardCategory};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{dimension_column, format_ts, parse_enum, parse_json, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

pub struct MilestoneEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MilestoneEventRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    pub fn insert(&self, event: &MilestoneEvent) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_on(&conn, event)
    }

    /// 追加事件 (在调用方事务内)
    pub(crate) fn insert_on(conn: &Connection, event: &MilestoneEvent) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO milestone_event (
                event_id, component_id, project_id, sequence, milestone_name,
                previous_value, new_value, delta_mh, category, actor, event_ts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                event.event_id,
                event.component_id,
                event.project_id,
                event.sequence,
                event.milestone_name,
                event.previous_value.as_ref().map(|v| v.to_string()),
                event.new_value.as_ref().map(|v| v.to_string()),
                event.delta_mh,
                event.category.map(|c| c.as_str()),
                event.actor,
                format_ts(&event.event_ts),
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 构件下一条事件的序号
    pub fn next_sequence(&self, component_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(sequence) FROM milestone_event WHERE component_id = ?1",
            params![component_id],
            |row| row.get(0),
        )?;
        Ok(max.map_or(1, |m| m + 1))
    }

    /// 按范围与时间窗 [start, end) 查询, 按 (event_ts, sequence) 排序
    pub fn find_by_scope(
        &self,
        scope: &EventScope,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepositoryResult<Vec<MilestoneEvent>> {
        let conn = self.get_conn()?;

        let mut sql = String::from(
            r#"
            SELECT e.event_id, e.component_id, e.project_id, e.sequence, e.milestone_name,
                   e.previous_value, e.new_value, e.delta_mh, e.category, e.actor, e.event_ts
            FROM milestone_event e
            "#,
        );
        let mut args: Vec<SqlValue> = Vec::new();

        match scope {
            EventScope::Component(id) => {
                sql.push_str(" WHERE e.component_id = ?");
                args.push(SqlValue::Text(id.clone()));
            }
            EventScope::Project(project_id) => {
                sql.push_str(" WHERE e.project_id = ?");
                args.push(SqlValue::Text(project_id.clone()));
            }
            EventScope::Dimension {
                project_id,
                dimension,
                key,
            } => {
                let column = dimension_column(*dimension);
                sql.push_str(" JOIN component c ON c.component_id = e.component_id WHERE e.project_id = ?");
                args.push(SqlValue::Text(project_id.clone()));
                if *dimension != DimensionKind::Project {
                    if key == UNASSIGNED_DIMENSION_KEY {
                        sql.push_str(&format!(
                            " AND (c.{col} IS NULL OR TRIM(c.{col}) = '')",
                            col = column
                        ));
                    } else {
                        sql.push_str(&format!(" AND c.{} = ?", column));
                        args.push(SqlValue::Text(key.clone()));
                    }
                }
            }
        }
        if let Some(s) = start {
            sql.push_str(" AND e.event_ts >= ?");
            args.push(SqlValue::Text(format_ts(&s)));
        }
        if let Some(e) = end {
            sql.push_str(" AND e.event_ts < ?");
            args.push(SqlValue::Text(format_ts(&e)));
        }
        sql.push_str(" ORDER BY e.event_ts, e.sequence, e.component_id");

        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(args.iter()), map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }
}

fn map_row(row: &Row) -> SqliteResult<MilestoneEvent> {
    let previous: Option<String> = row.get(5)?;
    let new: Option<String> = row.get(6)?;
    let category: Option<String> = row.get(8)?;
    let event_ts: String = row.get(10)?;

    Ok(MilestoneEvent {
        event_id: row.get(0)?,
        component_id: row.get(1)?,
        project_id: row.get(2)?,
        sequence: row.get(3)?,
        milestone_name: row.get(4)?,
        previous_value: previous.map(|s| parse_json(5, &s)).transpose()?,
        new_value: new.map(|s| parse_json(6, &s)).transpose()?,
        delta_mh: row.get(7)?,
        category: category
            .map(|c| parse_enum(8, &c, StandardCategory::from_str))
            .transpose()?,
        actor: row.get(9)?,
        event_ts: parse_ts(10, &event_ts)?,
    })
}
