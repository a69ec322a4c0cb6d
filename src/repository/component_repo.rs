// ==========================================
// 管道施工进度引擎 - 构件数据仓储
// ==========================================
// 表: component
// 红线: Repository 不做业务逻辑, 只做数据映射
// 红线: 里程碑状态与 percent_complete 的修改必须和事件写入同一事务
// ==========================================

use crate::domain::component::{Component, ComponentFilter};
use crate::domain::types::ComponentType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{format_ts, parse_enum, parse_json, parse_ts};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT component_id, project_id, component_type, identity_key, budgeted_mh,
           current_milestones, percent_complete, is_retired,
           area_id, system_id, test_package_id, drawing_id, welder_id,
           created_by, created_at, updated_at, revision
    FROM component
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO component (
        component_id, project_id, component_type, identity_key, budgeted_mh,
        current_milestones, percent_complete, is_retired,
        area_id, system_id, test_package_id, drawing_id, welder_id,
        created_by, created_at, updated_at, revision
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
"#;

fn insert_params(component: &Component) -> RepositoryResult<Vec<Box<dyn ToSql>>> {
    Ok(vec![
        Box::new(component.component_id.clone()),
        Box::new(component.project_id.clone()),
        Box::new(component.component_type.as_str()),
        Box::new(component.identity_key.clone()),
        Box::new(component.budgeted_mh),
        Box::new(serde_json::to_string(&component.current_milestones)?),
        Box::new(component.percent_complete),
        Box::new(component.is_retired),
        Box::new(component.area_id.clone()),
        Box::new(component.system_id.clone()),
        Box::new(component.test_package_id.clone()),
        Box::new(component.drawing_id.clone()),
        Box::new(component.welder_id.clone()),
        Box::new(component.created_by.clone()),
        Box::new(format_ts(&component.created_at)),
        Box::new(format_ts(&component.updated_at)),
        Box::new(component.revision),
    ])
}

// ==========================================
// ComponentRepository - 构件仓储
// ==========================================
pub struct ComponentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ComponentRepository {
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

    /// 插入或更新构件主数据 (按 component_id)
    ///
    /// 已存在时保留里程碑状态与 revision, 状态只经事件修改
    pub fn upsert(&self, component: &Component) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_on(&conn, component)
    }

    pub(crate) fn upsert_on(conn: &Connection, component: &Component) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "{} ON CONFLICT (component_id) DO UPDATE SET
                    project_id = excluded.project_id,
                    component_type = excluded.component_type,
                    identity_key = excluded.identity_key,
                    budgeted_mh = excluded.budgeted_mh,
                    percent_complete = excluded.percent_complete,
                    is_retired = excluded.is_retired,
                    area_id = excluded.area_id,
                    system_id = excluded.system_id,
                    test_package_id = excluded.test_package_id,
                    drawing_id = excluded.drawing_id,
                    welder_id = excluded.welder_id,
                    updated_at = excluded.updated_at",
                INSERT_SQL
            ),
            params_from_iter(insert_params(component)?),
        )?;
        Ok(())
    }

    /// 新建构件 (在调用方事务内), component_id 已存在时违反唯一约束
    pub(crate) fn insert_on(conn: &Connection, component: &Component) -> RepositoryResult<()> {
        conn.execute(INSERT_SQL, params_from_iter(insert_params(component)?))?;
        Ok(())
    }

    /// 写入里程碑状态与缓存百分比 (在调用方事务内, 带乐观锁检查)
    ///
    /// `component.revision` 为读取时的版本, 写入成功后库内版本 +1
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision不匹配 (读取后已被其他更新修改)
    /// - `RepositoryError::NotFound`: component_id不存在
    pub(crate) fn update_progress_on(conn: &Connection, component: &Component) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE component
            SET current_milestones = ?1, percent_complete = ?2, updated_at = ?3,
                revision = revision + 1
            WHERE component_id = ?4 AND revision = ?5
            "#,
            params![
                serde_json::to_string(&component.current_milestones)?,
                component.percent_complete,
                format_ts(&component.updated_at),
                component.component_id,
                component.revision,
            ],
        )?;
        if rows == 0 {
            let actual: Option<i32> = conn
                .query_row(
                    "SELECT revision FROM component WHERE component_id = ?1",
                    params![component.component_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    component_id: component.component_id.clone(),
                    expected: component.revision,
                    actual,
                },
                None => RepositoryError::NotFound {
                    entity: "Component".to_string(),
                    id: component.component_id.clone(),
                },
            });
        }
        Ok(())
    }

    /// 只改缓存百分比 (修复路径, 在调用方事务内)
    pub(crate) fn set_percent_on(conn: &Connection, component_id: &str, percent: f64) -> RepositoryResult<usize> {
        Ok(conn.execute(
            "UPDATE component SET percent_complete = ?1 WHERE component_id = ?2",
            params![percent, component_id],
        )?)
    }

    /// 删除构件 (事件经外键级联删除)
    pub fn delete(&self, component_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM component WHERE component_id = ?1",
            params![component_id],
        )?;
        Ok(rows > 0)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, component_id: &str) -> RepositoryResult<Option<Component>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE component_id = ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        match stmt.query_row(params![component_id], map_row) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按项目 + 过滤条件查询
    ///
    /// 退役标记在 SQL 中过滤, 其余条件 (类型 / 维度键 / ID) 由 `ComponentFilter::matches` 判定
    pub fn find_by_project(
        &self,
        project_id: &str,
        filter: &ComponentFilter,
    ) -> RepositoryResult<Vec<Component>> {
        let conn = self.get_conn()?;
        let sql = if filter.include_retired {
            format!("{} WHERE project_id = ?1 ORDER BY component_id", SELECT_COLUMNS)
        } else {
            format!(
                "{} WHERE project_id = ?1 AND is_retired = 0 ORDER BY component_id",
                SELECT_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let components = stmt
            .query_map(params![project_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(components.into_iter().filter(|c| filter.matches(c)).collect())
    }
}

fn map_row(row: &Row) -> SqliteResult<Component> {
    let component_type: String = row.get(2)?;
    let milestones: String = row.get(5)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Component {
        component_id: row.get(0)?,
        project_id: row.get(1)?,
        component_type: parse_enum(2, &component_type, ComponentType::from_str)?,
        identity_key: row.get(3)?,
        budgeted_mh: row.get(4)?,
        current_milestones: parse_json(5, &milestones)?,
        percent_complete: row.get(6)?,
        is_retired: row.get(7)?,
        area_id: row.get(8)?,
        system_id: row.get(9)?,
        test_package_id: row.get(10)?,
        drawing_id: row.get(11)?,
        welder_id: row.get(12)?,
        created_by: row.get(13)?,
        created_at: parse_ts(14, &created_at)?,
        updated_at: parse_ts(15, &updated_at)?,
        revision: row.get(16)?,
    })
}
