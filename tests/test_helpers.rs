// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据生成等功能
// ==========================================
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use construction_progress::db::{init_schema, open_sqlite_connection};
use construction_progress::domain::{
    Component, ComponentType, MilestoneEvent, MilestoneState, StandardCategory,
};
use construction_progress::repository::SqliteProgressStore;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 在临时数据库上打开 SQLite 数据协作方
pub fn create_test_store() -> (NamedTempFile, Arc<SqliteProgressStore>) {
    let (temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let conn = open_sqlite_connection(&db_path).expect("Failed to open test db");
    let store = SqliteProgressStore::new(Arc::new(Mutex::new(conn)));
    (temp_file, Arc::new(store))
}

/// 测试基准时间 2025-05-01 08:00:00 + minutes
pub fn ts(minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 5, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(minutes)
}

pub fn state(pairs: &[(&str, JsonValue)]) -> MilestoneState {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ==========================================
// 构件构造器
// ==========================================
pub struct ComponentBuilder {
    component: Component,
}

impl ComponentBuilder {
    pub fn new(id: &str, component_type: ComponentType) -> Self {
        Self {
            component: Component {
                component_id: id.to_string(),
                project_id: "P1".to_string(),
                component_type,
                identity_key: format!("KEY-{}", id),
                budgeted_mh: Some(10.0),
                current_milestones: MilestoneState::new(),
                percent_complete: 0.0,
                is_retired: false,
                area_id: Some("A-100".to_string()),
                system_id: None,
                test_package_id: None,
                drawing_id: None,
                welder_id: None,
                created_by: "tester".to_string(),
                created_at: ts(0),
                updated_at: ts(0),
                revision: 0,
            },
        }
    }

    pub fn project(mut self, project_id: &str) -> Self {
        self.component.project_id = project_id.to_string();
        self
    }

    pub fn budget(mut self, budget: Option<f64>) -> Self {
        self.component.budgeted_mh = budget;
        self
    }

    pub fn area(mut self, area: Option<&str>) -> Self {
        self.component.area_id = area.map(str::to_string);
        self
    }

    pub fn system(mut self, system: &str) -> Self {
        self.component.system_id = Some(system.to_string());
        self
    }

    pub fn welder(mut self, welder: &str) -> Self {
        self.component.welder_id = Some(welder.to_string());
        self
    }

    pub fn milestones(mut self, pairs: &[(&str, JsonValue)]) -> Self {
        self.component.current_milestones = state(pairs);
        self
    }

    pub fn stored_percent(mut self, percent: f64) -> Self {
        self.component.percent_complete = percent;
        self
    }

    pub fn retired(mut self) -> Self {
        self.component.is_retired = true;
        self
    }

    pub fn build(self) -> Component {
        self.component
    }
}

/// 构造一条里程碑事件
pub fn event(
    id: &str,
    component: &Component,
    milestone: &str,
    previous: Option<JsonValue>,
    new: Option<JsonValue>,
    minutes: i64,
    sequence: i64,
) -> MilestoneEvent {
    MilestoneEvent {
        event_id: id.to_string(),
        component_id: component.component_id.clone(),
        project_id: component.project_id.clone(),
        sequence,
        milestone_name: milestone.to_string(),
        previous_value: previous,
        new_value: new,
        delta_mh: 0.0,
        category: Some(StandardCategory::Install),
        actor: "tester".to_string(),
        event_ts: ts(minutes),
    }
}
