// ==========================================
// 管道施工进度引擎 - 里程碑目录仓储
// ==========================================
// 表: milestone_definition (每行一个里程碑, 按 sequence 保序)
// 红线: 只存取, 权重合计等校验在目录加载时完成
// ==========================================

use crate::domain::milestone::{MilestoneDefinition, MilestoneSpec};
use crate::domain::types::{ComponentType, MilestoneKind, StandardCategory};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::parse_enum;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 别名列分隔符
pub const ALIAS_SEPARATOR: char = '|';

pub struct MilestoneDefinitionRepository {
    conn: Arc<Mutex<Connection>>,
}

struct DefinitionRow {
    component_type: ComponentType,
    version: i32,
    spec: MilestoneSpec,
}

impl MilestoneDefinitionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 保存一个版本的定义 (同类型同版本整体替换)
    pub fn save(&self, definition: &MilestoneDefinition) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM milestone_definition WHERE component_type = ?1 AND version = ?2",
            params![definition.component_type.as_str(), definition.version],
        )?;
        let mut count = 0;
        for (sequence, spec) in definition.milestones.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO milestone_definition (
                    component_type, version, sequence, milestone, weight, kind, category, aliases
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    definition.component_type.as_str(),
                    definition.version,
                    sequence as i64,
                    spec.name,
                    spec.weight,
                    spec.kind.as_str(),
                    spec.category.as_str(),
                    spec.aliases.join(&ALIAS_SEPARATOR.to_string()),
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// 查询定义
    ///
    /// # 参数
    /// - `component_type`: None 表示全部类型
    /// - `version`: None 表示每个类型取最新版本; Some(v) 表示每个类型取 ≤ v 的最高版本
    pub fn find(
        &self,
        component_type: Option<ComponentType>,
        version: Option<i32>,
    ) -> RepositoryResult<Vec<MilestoneDefinition>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT component_type, version, milestone, weight, kind, category, aliases
            FROM milestone_definition
            ORDER BY component_type, version, sequence
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                let ct: String = row.get(0)?;
                let kind: String = row.get(4)?;
                let category: String = row.get(5)?;
                let aliases: String = row.get(6)?;
                Ok(DefinitionRow {
                    component_type: parse_enum(0, &ct, ComponentType::from_str)?,
                    version: row.get(1)?,
                    spec: MilestoneSpec {
                        name: row.get(2)?,
                        weight: row.get(3)?,
                        kind: parse_enum(4, &kind, MilestoneKind::from_str)?,
                        category: parse_enum(5, &category, StandardCategory::from_str)?,
                        aliases: aliases
                            .split(ALIAS_SEPARATOR)
                            .map(|a| a.trim())
                            .filter(|a| !a.is_empty())
                            .map(|a| a.to_string())
                            .collect(),
                    },
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut grouped: BTreeMap<(ComponentType, i32), Vec<MilestoneSpec>> = BTreeMap::new();
        for row in rows {
            if component_type.map_or(false, |ct| ct != row.component_type) {
                continue;
            }
            if version.map_or(false, |v| row.version > v) {
                continue;
            }
            grouped
                .entry((row.component_type, row.version))
                .or_default()
                .push(row.spec);
        }

        // 每个类型只保留最高版本
        let mut latest: BTreeMap<ComponentType, MilestoneDefinition> = BTreeMap::new();
        for ((ct, v), specs) in grouped {
            latest.insert(ct, MilestoneDefinition::new(ct, v, specs));
        }
        Ok(latest.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> MilestoneDefinitionRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        MilestoneDefinitionRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn weld_def(version: i32, fit_up: f64) -> MilestoneDefinition {
        MilestoneDefinition::new(
            ComponentType::FieldWeld,
            version,
            vec![
                MilestoneSpec::new("Fit-up", fit_up, MilestoneKind::Discrete, StandardCategory::Install)
                    .with_aliases(&["Fitup"]),
                MilestoneSpec::new(
                    "Weld Complete",
                    100.0 - fit_up,
                    MilestoneKind::Discrete,
                    StandardCategory::Install,
                )
                .with_aliases(&["Weld Made", "Welded"]),
            ],
        )
    }

    #[test]
    fn test_save_and_find_latest() {
        let repo = setup();
        repo.save(&weld_def(1, 40.0)).unwrap();
        repo.save(&weld_def(2, 30.0)).unwrap();

        let latest = repo.find(Some(ComponentType::FieldWeld), None).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0], weld_def(2, 30.0));

        let historical = repo.find(None, Some(1)).unwrap();
        assert_eq!(historical, vec![weld_def(1, 40.0)]);
    }

    #[test]
    fn test_resave_replaces_version() {
        let repo = setup();
        repo.save(&weld_def(1, 40.0)).unwrap();
        repo.save(&weld_def(1, 20.0)).unwrap();
        let defs = repo.find(None, None).unwrap();
        assert_eq!(defs[0].milestones[0].weight, 20.0);
        assert_eq!(defs[0].milestones.len(), 2);
    }
}
