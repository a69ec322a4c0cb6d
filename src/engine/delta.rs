// ==========================================
// 管道施工进度引擎 - 时间窗增量引擎
// ==========================================
// 职责: 回放 [start, end) 内的里程碑事件, 计算挣值工时变化
// 红线: 与当前状态计算器相互独立, 但全生命周期净增量必须与之对账
// 红线: 每个构件的事件按 (时间戳, 序号) 严格顺序处理
// ==========================================
// 口径:
// - FORWARD_ONLY: max(新比例 - 旧比例, 0) × 权重 × 预算 / 100
// - NET: 带符号, 回退为负值
// 未分类事件: 不计入类别合计, 但计入原始事件数
// ==========================================

use crate::domain::component::{Component, MilestoneState};
use crate::domain::dimension::CategoryAmounts;
use crate::domain::milestone::{MilestoneEvent, MilestoneSpec};
use crate::domain::types::{DeltaMode, MilestoneKind, ReportingPolicy, StandardCategory};
use crate::domain::warning::{EngineWarning, WarningKind};
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::{normalize_milestone_name, ClassificationGapTracker, MilestoneCatalog};
use crate::engine::normalizer::MilestoneValueNormalizer;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// 判定回退的最小幅度 (工时)
const ROLLBACK_EPSILON: f64 = 1e-12;

// ==========================================
// 单个事件的贡献
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContribution {
    pub event_id: String,
    pub component_id: String,
    pub milestone: String,
    pub category: StandardCategory,
    pub event_ts: NaiveDateTime,
    pub previous_fraction: f64,
    pub new_fraction: f64,
    pub signed_mh: f64,
}

impl EventContribution {
    pub fn is_rollback(&self) -> bool {
        self.signed_mh < -ROLLBACK_EPSILON
    }

    pub fn counted_mh(&self, mode: DeltaMode) -> f64 {
        match mode {
            DeltaMode::Net => self.signed_mh,
            DeltaMode::ForwardOnly => self.signed_mh.max(0.0),
        }
    }
}

// ==========================================
// DeltaResult - 时间窗增量结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaResult {
    pub mode: DeltaMode,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    /// 按口径计的挣值增量
    pub earned_delta_mh: f64,
    /// 正向进度合计
    pub forward_mh: f64,
    /// 回退合计 (≤ 0)
    pub rollback_mh: f64,
    /// 已分类事件按类别的增量 (按口径)
    pub by_category: CategoryAmounts,
    pub per_component: BTreeMap<String, f64>,
    /// 窗口内原始事件数 (含未分类)
    pub event_count: usize,
    pub classified_event_count: usize,
    pub unclassified_event_count: usize,
    /// 构件不在快照中的事件 (例如已退役)
    pub skipped_event_count: usize,
    pub rollback_events: Vec<EventContribution>,
    pub warnings: Vec<EngineWarning>,
    #[serde(skip)]
    pub gaps: ClassificationGapTracker,
}

impl DeltaResult {
    fn empty(mode: DeltaMode, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self {
            mode,
            start,
            end,
            earned_delta_mh: 0.0,
            forward_mh: 0.0,
            rollback_mh: 0.0,
            by_category: CategoryAmounts::default(),
            per_component: BTreeMap::new(),
            event_count: 0,
            classified_event_count: 0,
            unclassified_event_count: 0,
            skipped_event_count: 0,
            rollback_events: Vec::new(),
            warnings: Vec::new(),
            gaps: ClassificationGapTracker::new(),
        }
    }

    /// 合并另一分片 (不同构件) 的结果
    pub fn merge(&mut self, other: DeltaResult) {
        self.earned_delta_mh += other.earned_delta_mh;
        self.forward_mh += other.forward_mh;
        self.rollback_mh += other.rollback_mh;
        self.by_category.merge(&other.by_category);
        for (id, v) in other.per_component {
            *self.per_component.entry(id).or_insert(0.0) += v;
        }
        self.event_count += other.event_count;
        self.classified_event_count += other.classified_event_count;
        self.unclassified_event_count += other.unclassified_event_count;
        self.skipped_event_count += other.skipped_event_count;
        self.rollback_events.extend(other.rollback_events);
        self.warnings.extend(other.warnings);
        self.gaps.merge(other.gaps);
    }

    pub fn category_delta(&self, category: StandardCategory) -> f64 {
        self.by_category.get(category)
    }
}

// ==========================================
// ReplayOutcome - 全生命周期回放结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub component_id: String,
    pub event_count: usize,
    /// 回放得到的里程碑状态 (按规范名称)
    pub replayed_state: MilestoneState,
    /// 回放净增量合计
    pub net_earned_mh: f64,
    /// 当前状态计算出的挣值
    pub current_earned_mh: f64,
    /// 回放状态与当前状态不一致的里程碑
    pub state_mismatches: Vec<String>,
    pub warnings: Vec<EngineWarning>,
}

impl ReplayOutcome {
    pub fn reconciles(&self, tolerance_mh: f64) -> bool {
        (self.net_earned_mh - self.current_earned_mh).abs() <= tolerance_mh
    }
}

// ==========================================
// DeltaEngine
// ==========================================
pub struct DeltaEngine;

impl DeltaEngine {
    /// 单个事件的带符号贡献
    ///
    /// # 返回
    /// - `None`: 里程碑不在目录中 (未分类)
    pub fn event_contribution(
        catalog: &MilestoneCatalog,
        component: &Component,
        event: &MilestoneEvent,
    ) -> Option<EventContribution> {
        let spec = catalog.resolve(component.component_type, &event.milestone_name)?;
        Some(Self::contribution_between(
            spec,
            component,
            event,
            event.previous_value.as_ref(),
            event.new_value.as_ref(),
        ))
    }

    fn contribution_between(
        spec: &MilestoneSpec,
        component: &Component,
        event: &MilestoneEvent,
        previous: Option<&JsonValue>,
        new: Option<&JsonValue>,
    ) -> EventContribution {
        let previous_fraction = MilestoneValueNormalizer::fraction(previous, spec.kind);
        let new_fraction = MilestoneValueNormalizer::fraction(new, spec.kind);
        let signed_mh = (new_fraction - previous_fraction) * spec.weight * component.budget_mh() / 100.0;
        EventContribution {
            event_id: event.event_id.clone(),
            component_id: component.component_id.clone(),
            milestone: spec.name.clone(),
            category: spec.category,
            event_ts: event.event_ts,
            previous_fraction,
            new_fraction,
            signed_mh,
        }
    }

    /// 时间窗增量
    ///
    /// # 参数
    /// - `components`: 范围内的构件快照
    /// - `events`: 范围内的事件 (顺序不限, 内部按构件分组排序)
    /// - `start` / `end`: 窗口 [start, end), `None` 表示不限
    /// - `mode`: 口径
    pub fn delta(
        catalog: &MilestoneCatalog,
        components: &[Component],
        events: &[MilestoneEvent],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        mode: DeltaMode,
    ) -> DeltaResult {
        let by_id: HashMap<&str, &Component> = components
            .iter()
            .map(|c| (c.component_id.as_str(), c))
            .collect();

        let mut result = DeltaResult::empty(mode, start, end);

        for (component_id, stream) in Self::group_ordered(events, start, end) {
            let component = match by_id.get(component_id) {
                Some(c) => *c,
                None => {
                    result.event_count += stream.len();
                    result.skipped_event_count += stream.len();
                    continue;
                }
            };

            for event in stream {
                result.event_count += 1;
                let contribution = match Self::event_contribution(catalog, component, event) {
                    Some(c) => c,
                    None => {
                        result.unclassified_event_count += 1;
                        result
                            .gaps
                            .record_event(component.component_type, &event.milestone_name);
                        continue;
                    }
                };
                result.classified_event_count += 1;

                let counted = contribution.counted_mh(mode);
                result.earned_delta_mh += counted;
                result.by_category.add(contribution.category, counted);
                *result
                    .per_component
                    .entry(component.component_id.clone())
                    .or_insert(0.0) += counted;

                if contribution.is_rollback() {
                    tracing::debug!(
                        component_id = %component.component_id,
                        milestone = %contribution.milestone,
                        delta_mh = contribution.signed_mh,
                        "检测到里程碑回退"
                    );
                    result.rollback_mh += contribution.signed_mh;
                    result.rollback_events.push(contribution);
                } else {
                    result.forward_mh += contribution.signed_mh;
                }
            }
        }

        result
    }

    /// 按构件分组并排序, 只保留窗口内事件
    fn group_ordered<'a>(
        events: &'a [MilestoneEvent],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> BTreeMap<&'a str, Vec<&'a MilestoneEvent>> {
        let mut groups: BTreeMap<&str, Vec<&MilestoneEvent>> = BTreeMap::new();
        for event in events {
            if start.map_or(false, |s| event.event_ts < s) || end.map_or(false, |e| event.event_ts >= e) {
                continue;
            }
            groups
                .entry(event.component_id.as_str())
                .or_default()
                .push(event);
        }
        for stream in groups.values_mut() {
            stream.sort_by_key(|e| e.order_key());
        }
        groups
    }

    /// 全生命周期回放 (从空状态开始)
    ///
    /// 前值取回放状态而不是事件记录的前值; 两者不一致记为事件链断裂
    pub fn replay_lifetime(
        catalog: &MilestoneCatalog,
        component: &Component,
        events: &[MilestoneEvent],
    ) -> ReplayOutcome {
        let ct = component.component_type;
        let id = component.component_id.as_str();
        let mut stream: Vec<&MilestoneEvent> = events.iter().filter(|e| e.component_id == id).collect();
        stream.sort_by_key(|e| e.order_key());

        let mut state = MilestoneState::new();
        let mut net_earned_mh = 0.0;
        let mut warnings = Vec::new();

        for event in &stream {
            let key = Self::state_key(catalog, component, &event.milestone_name);
            let kind = catalog
                .resolve(ct, &event.milestone_name)
                .map(|s| s.kind)
                .unwrap_or(MilestoneKind::Partial);

            let expected = state.get(&key).cloned();
            if !values_equivalent(expected.as_ref(), event.previous_value.as_ref(), kind) {
                tracing::warn!(
                    component_id = id,
                    milestone = %event.milestone_name,
                    event_id = %event.event_id,
                    "事件前值与回放状态不一致, 可能存在遗漏事件"
                );
                warnings.push(EngineWarning::for_component(
                    id,
                    WarningKind::EventChainBreak {
                        milestone: event.milestone_name.clone(),
                        expected: expected.clone(),
                        recorded: event.previous_value.clone(),
                    },
                ));
            }

            if let Some(spec) = catalog.resolve(ct, &event.milestone_name) {
                let c = Self::contribution_between(
                    spec,
                    component,
                    event,
                    expected.as_ref(),
                    event.new_value.as_ref(),
                );
                net_earned_mh += c.signed_mh;
            }

            match &event.new_value {
                Some(v) => {
                    state.insert(key, v.clone());
                }
                None => {
                    state.remove(&key);
                }
            }
        }

        // 当前状态挣值 (独立路径)
        let current_earned_mh = match PercentCompleteCalculator::calculate(
            catalog,
            ct,
            &component.current_milestones,
        ) {
            Ok(r) => r.value * component.budget_mh() / 100.0,
            Err(_) => 0.0,
        };

        // 回放状态 vs 当前状态
        let mut current = MilestoneState::new();
        for (name, value) in &component.current_milestones {
            current.insert(Self::state_key(catalog, component, name), value.clone());
        }
        let mut state_mismatches = Vec::new();
        let mut names: Vec<&String> = state.keys().chain(current.keys()).collect();
        names.sort();
        names.dedup();
        for name in names {
            let kind = catalog
                .resolve(ct, name)
                .map(|s| s.kind)
                .unwrap_or(MilestoneKind::Partial);
            if !values_equivalent(state.get(name), current.get(name), kind) {
                state_mismatches.push(name.clone());
            }
        }

        ReplayOutcome {
            component_id: id.to_string(),
            event_count: stream.len(),
            replayed_state: state,
            net_earned_mh,
            current_earned_mh,
            state_mismatches,
            warnings,
        }
    }

    /// 回放状态键: 已分类用规范名称, 未分类用规范化名称
    fn state_key(catalog: &MilestoneCatalog, component: &Component, name: &str) -> String {
        match catalog.canonical_name(component.component_type, name) {
            Some(canonical) => canonical.to_string(),
            None => normalize_milestone_name(name),
        }
    }

    /// 对外报告口径的净增量
    ///
    /// # 参数
    /// - `events`: 截至 `end` 的全部事件 (需包含 `start` 之前的历史)
    ///
    /// # 说明
    /// - ACTUAL: 窗口内累计挣值之差 (可为负)
    /// - FLOOR_AT_HISTORICAL_MAX: 累计挣值历史最高值之差 (不为负)
    pub fn reported_delta(
        catalog: &MilestoneCatalog,
        components: &[Component],
        events: &[MilestoneEvent],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        policy: ReportingPolicy,
    ) -> f64 {
        let by_id: HashMap<&str, &Component> = components
            .iter()
            .map(|c| (c.component_id.as_str(), c))
            .collect();

        let mut ordered: Vec<&MilestoneEvent> = events
            .iter()
            .filter(|e| end.map_or(true, |end| e.event_ts < end))
            .collect();
        ordered.sort_by(|a, b| {
            a.order_key()
                .cmp(&b.order_key())
                .then_with(|| a.component_id.cmp(&b.component_id))
        });

        let mut cumulative = 0.0;
        let mut high_water = 0.0_f64;
        let mut at_start = (0.0, 0.0_f64);
        let mut start_captured = start.is_none();

        for event in ordered {
            if !start_captured && start.map_or(false, |s| event.event_ts >= s) {
                at_start = (cumulative, high_water);
                start_captured = true;
            }
            let component = match by_id.get(event.component_id.as_str()) {
                Some(c) => *c,
                None => continue,
            };
            if let Some(c) = Self::event_contribution(catalog, component, event) {
                cumulative += c.signed_mh;
                high_water = high_water.max(cumulative);
            }
        }
        if !start_captured {
            at_start = (cumulative, high_water);
        }

        match policy {
            ReportingPolicy::Actual => cumulative - at_start.0,
            ReportingPolicy::FloorAtHistoricalMax => high_water - at_start.1,
        }
    }
}

/// 两个原始值是否等价: JSON 相等, 或数值相等, 或规范化比例相等
fn values_equivalent(a: Option<&JsonValue>, b: Option<&JsonValue>, kind: MilestoneKind) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) if (fx - fy).abs() < 1e-9 => true,
                _ => {
                    (MilestoneValueNormalizer::fraction(Some(x), kind)
                        - MilestoneValueNormalizer::fraction(Some(y), kind))
                    .abs()
                        < 1e-9
                        && !x.is_null()
                        && !y.is_null()
                }
            }
        }
        (Some(v), None) | (None, Some(v)) => {
            // 缺失等价于未开始 (false / 0)
            matches!(v, JsonValue::Bool(false))
                || v.as_f64().map_or(false, |f| f == 0.0)
        }
    }
}

#[cfg(test)]
mod tests;
