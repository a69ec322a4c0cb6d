// ==========================================
// 管道施工进度引擎 - 汇总维度模型
// ==========================================
// 红线: 维度合计只能由构件推导, 物化视图必须可按需刷新
// 列契约: 预算 / 各标准类别挣值 / 挣值合计 / 完成百分比
// ==========================================

use crate::domain::types::{DimensionKind, StandardCategory};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// CategoryAmounts - 按标准类别的工时
// ==========================================
// 每个标准类别一个固定字段, 调用方可直接求和
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAmounts {
    pub receive: f64,
    pub install: f64,
    pub punch: f64,
    pub test: f64,
    pub restore: f64,
}

impl CategoryAmounts {
    pub fn get(&self, category: StandardCategory) -> f64 {
        match category {
            StandardCategory::Receive => self.receive,
            StandardCategory::Install => self.install,
            StandardCategory::Punch => self.punch,
            StandardCategory::Test => self.test,
            StandardCategory::Restore => self.restore,
        }
    }

    pub fn add(&mut self, category: StandardCategory, value: f64) {
        match category {
            StandardCategory::Receive => self.receive += value,
            StandardCategory::Install => self.install += value,
            StandardCategory::Punch => self.punch += value,
            StandardCategory::Test => self.test += value,
            StandardCategory::Restore => self.restore += value,
        }
    }

    pub fn total(&self) -> f64 {
        self.receive + self.install + self.punch + self.test + self.restore
    }

    pub fn merge(&mut self, other: &CategoryAmounts) {
        for category in StandardCategory::ALL {
            self.add(category, other.get(category));
        }
    }

    pub fn scaled(&self, factor: f64) -> CategoryAmounts {
        CategoryAmounts {
            receive: self.receive * factor,
            install: self.install * factor,
            punch: self.punch * factor,
            test: self.test * factor,
            restore: self.restore * factor,
        }
    }
}

// ==========================================
// DimensionTotals - 单个维度键的合计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionTotals {
    pub dimension: DimensionKind,
    pub key: String,
    pub label: Option<String>,
    pub component_count: usize,
    pub budget_mh: f64,
    pub earned_mh: f64,
    pub earned_by_category: CategoryAmounts,
}

impl DimensionTotals {
    pub fn empty(dimension: DimensionKind, key: &str) -> Self {
        Self {
            dimension,
            key: key.to_string(),
            label: None,
            component_count: 0,
            budget_mh: 0.0,
            earned_mh: 0.0,
            earned_by_category: CategoryAmounts::default(),
        }
    }

    /// 完成百分比, 预算为 0 时返回 0
    pub fn percent_complete(&self) -> f64 {
        if self.budget_mh > 0.0 {
            self.earned_mh / self.budget_mh * 100.0
        } else {
            0.0
        }
    }

    /// 合并 (结合律 + 交换律, 求和)
    pub fn merge(&mut self, other: &DimensionTotals) {
        self.component_count += other.component_count;
        self.budget_mh += other.budget_mh;
        self.earned_mh += other.earned_mh;
        self.earned_by_category.merge(&other.earned_by_category);
        if self.label.is_none() {
            self.label = other.label.clone();
        }
    }
}

// ==========================================
// DimensionMetadata - 维度标签表
// ==========================================
// 仅用于展示, 不参与数值计算
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionMetadata {
    pub areas: BTreeMap<String, String>,
    pub systems: BTreeMap<String, String>,
    pub test_packages: BTreeMap<String, String>,
    pub welders: BTreeMap<String, String>,
}

impl DimensionMetadata {
    pub fn label(&self, dimension: DimensionKind, key: &str) -> Option<&str> {
        let table = match dimension {
            DimensionKind::Area => &self.areas,
            DimensionKind::System => &self.systems,
            DimensionKind::TestPackage => &self.test_packages,
            DimensionKind::Welder => &self.welders,
            DimensionKind::Project => return None,
        };
        table.get(key).map(|s| s.as_str())
    }

    pub fn insert(&mut self, dimension: DimensionKind, key: &str, label: &str) {
        let table = match dimension {
            DimensionKind::Area => &mut self.areas,
            DimensionKind::System => &mut self.systems,
            DimensionKind::TestPackage => &mut self.test_packages,
            DimensionKind::Welder => &mut self.welders,
            DimensionKind::Project => return,
        };
        table.insert(key.to_string(), label.to_string());
    }
}

// ==========================================
// MaterializedViewRow - 物化视图行
// ==========================================
// progress_view 表的缓存合计, 审计时与重算结果比对
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedViewRow {
    pub project_id: String,
    pub totals: DimensionTotals,
    pub refreshed_at: NaiveDateTime,
}
