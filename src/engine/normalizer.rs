// ==========================================
// 管道施工进度引擎 - 里程碑取值规范化
// ==========================================
// 职责: 异构原始值 (bool / 0-1 / 0-100 / 数字字符串) → 完成比例 [0,1]
// 红线: 离散里程碑没有部分完成语义, 部分值拒绝并告警, 不四舍五入
// 红线: 无法解析的值按 0 处理并告警, 不抛错
// ==========================================

use crate::domain::types::MilestoneKind;
use crate::domain::warning::WarningKind;
use serde_json::Value as JsonValue;

/// 比较完成比例时的浮点容差
const FRACTION_EPSILON: f64 = 1e-9;

/// 规范化结果
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedValue {
    pub fraction: f64,
    pub warning: Option<WarningKind>,
}

impl NormalizedValue {
    fn ok(fraction: f64) -> Self {
        Self {
            fraction,
            warning: None,
        }
    }

    fn flagged(fraction: f64, warning: WarningKind) -> Self {
        Self {
            fraction,
            warning: Some(warning),
        }
    }
}

// ==========================================
// MilestoneValueNormalizer
// ==========================================
pub struct MilestoneValueNormalizer;

impl MilestoneValueNormalizer {
    /// 规范化单个里程碑取值
    ///
    /// # 参数
    /// - `raw`: 原始值, `None` 表示键不存在 (按 0 处理, 不告警)
    /// - `kind`: 里程碑完成方式
    /// - `milestone`: 里程碑名称 (仅用于告警)
    ///
    /// # 规则
    /// - `true` → 1, `false` → 0
    /// - 数值 ≤ 1 视为比例, > 1 视为百分比 (除以 100)
    /// - 数字字符串按数值处理, 允许末尾 `%`
    /// - 离散里程碑只接受 0 或 1 (含 100), 其余取值按 0 并告警
    pub fn normalize(raw: Option<&JsonValue>, kind: MilestoneKind, milestone: &str) -> NormalizedValue {
        let raw = match raw {
            None => return NormalizedValue::ok(0.0),
            Some(v) => v,
        };

        let parsed = Self::to_fraction(raw, milestone);
        match kind {
            MilestoneKind::Partial => parsed,
            MilestoneKind::Discrete => {
                // 离散里程碑不截断: 负值 / 超过 100 / 无法解析一律按 0
                if parsed.warning.is_some() {
                    return NormalizedValue { fraction: 0.0, ..parsed };
                }
                if (parsed.fraction - 1.0).abs() < FRACTION_EPSILON {
                    NormalizedValue::ok(1.0)
                } else if parsed.fraction.abs() < FRACTION_EPSILON {
                    NormalizedValue::ok(0.0)
                } else {
                    tracing::warn!(
                        milestone = milestone,
                        raw = %raw,
                        "离散里程碑收到部分完成值, 按 0 处理"
                    );
                    NormalizedValue::flagged(
                        0.0,
                        WarningKind::AmbiguousDiscreteValue {
                            milestone: milestone.to_string(),
                            raw: raw.clone(),
                        },
                    )
                }
            }
        }
    }

    /// 便捷方法: 只取比例
    pub fn fraction(raw: Option<&JsonValue>, kind: MilestoneKind) -> f64 {
        Self::normalize(raw, kind, "").fraction
    }

    /// 原始值 → 比例 (不区分离散 / 部分)
    fn to_fraction(raw: &JsonValue, milestone: &str) -> NormalizedValue {
        match raw {
            JsonValue::Bool(b) => NormalizedValue::ok(if *b { 1.0 } else { 0.0 }),
            JsonValue::Number(n) => match n.as_f64() {
                Some(v) => Self::scale(v, raw, milestone),
                None => Self::unparseable(raw, milestone),
            },
            JsonValue::String(s) => {
                let text = s.trim();
                match text.to_lowercase().as_str() {
                    "true" => return NormalizedValue::ok(1.0),
                    "false" => return NormalizedValue::ok(0.0),
                    _ => {}
                }
                let numeric = text.strip_suffix('%').unwrap_or(text).trim();
                match numeric.parse::<f64>() {
                    Ok(v) => Self::scale(v, raw, milestone),
                    Err(_) => Self::unparseable(raw, milestone),
                }
            }
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => {
                Self::unparseable(raw, milestone)
            }
        }
    }

    /// 数值 → 比例: > 1 视为 0-100 口径
    fn scale(value: f64, raw: &JsonValue, milestone: &str) -> NormalizedValue {
        if !value.is_finite() {
            return Self::unparseable(raw, milestone);
        }
        let out_of_range = || WarningKind::OutOfRangeValue {
            milestone: milestone.to_string(),
            raw: raw.clone(),
        };
        if value < 0.0 {
            tracing::warn!(milestone = milestone, raw = %raw, "里程碑取值为负, 按 0 处理");
            return NormalizedValue::flagged(0.0, out_of_range());
        }
        if value <= 1.0 {
            return NormalizedValue::ok(value);
        }
        if value <= 100.0 {
            return NormalizedValue::ok(value / 100.0);
        }
        tracing::warn!(milestone = milestone, raw = %raw, "里程碑取值超过 100");
        NormalizedValue::flagged(1.0, out_of_range())
    }

    fn unparseable(raw: &JsonValue, milestone: &str) -> NormalizedValue {
        tracing::warn!(milestone = milestone, raw = %raw, "里程碑取值无法解析, 按 0 处理");
        NormalizedValue::flagged(
            0.0,
            WarningKind::UnparseableValue {
                milestone: milestone.to_string(),
                raw: raw.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn discrete(v: JsonValue) -> NormalizedValue {
        MilestoneValueNormalizer::normalize(Some(&v), MilestoneKind::Discrete, "Fit-up")
    }

    fn partial(v: JsonValue) -> NormalizedValue {
        MilestoneValueNormalizer::normalize(Some(&v), MilestoneKind::Partial, "Install")
    }

    #[test]
    fn test_discrete_representations_agree() {
        assert_eq!(discrete(json!(true)).fraction, 1.0);
        assert_eq!(discrete(json!(1)).fraction, 1.0);
        assert_eq!(discrete(json!(100)).fraction, 1.0);
        assert_eq!(discrete(json!("100")).fraction, 1.0);
        assert_eq!(discrete(json!(false)).fraction, 0.0);
        assert_eq!(discrete(json!(0)).fraction, 0.0);
        assert_eq!(discrete(json!("0")).fraction, 0.0);
        assert!(discrete(json!(true)).warning.is_none());
        assert!(discrete(json!(100.0)).warning.is_none());
    }

    #[test]
    fn test_discrete_partial_value_is_rejected() {
        let result = discrete(json!(0.5));
        assert_eq!(result.fraction, 0.0);
        assert!(matches!(
            result.warning,
            Some(WarningKind::AmbiguousDiscreteValue { .. })
        ));

        let result = discrete(json!(50));
        assert_eq!(result.fraction, 0.0);
        assert!(result.warning.is_some());
    }

    #[test]
    fn test_partial_scales() {
        assert_eq!(partial(json!(0.25)).fraction, 0.25);
        assert_eq!(partial(json!(50)).fraction, 0.5);
        assert_eq!(partial(json!("75")).fraction, 0.75);
        assert_eq!(partial(json!("40%")).fraction, 0.4);
        assert_eq!(partial(json!(1)).fraction, 1.0);
        assert_eq!(partial(json!(true)).fraction, 1.0);
    }

    #[test]
    fn test_unparseable_defaults_to_zero_with_warning() {
        for raw in [json!(null), json!("n/a"), json!(""), json!([1]), json!({"v": 1})] {
            let result = partial(raw);
            assert_eq!(result.fraction, 0.0);
            assert!(matches!(
                result.warning,
                Some(WarningKind::UnparseableValue { .. })
            ));
        }
    }

    #[test]
    fn test_absent_is_zero_without_warning() {
        let result = MilestoneValueNormalizer::normalize(None, MilestoneKind::Partial, "Erect");
        assert_eq!(result, NormalizedValue::ok(0.0));
    }

    #[test]
    fn test_out_of_range_values() {
        let over = partial(json!(150));
        assert_eq!(over.fraction, 1.0);
        assert!(matches!(over.warning, Some(WarningKind::OutOfRangeValue { .. })));

        let negative = partial(json!(-5));
        assert_eq!(negative.fraction, 0.0);
        assert!(negative.warning.is_some());
    }

    #[test]
    fn test_discrete_value_above_hundred_is_not_complete() {
        for raw in [json!(150), json!("250%"), json!(100.5)] {
            let result = discrete(raw);
            assert_eq!(result.fraction, 0.0);
            assert!(matches!(
                result.warning,
                Some(WarningKind::OutOfRangeValue { .. })
            ));
        }
        // 部分里程碑仍截断为完成
        assert_eq!(partial(json!(150)).fraction, 1.0);
    }

    #[test]
    fn test_string_booleans_are_case_insensitive() {
        assert_eq!(discrete(json!("TRUE")).fraction, 1.0);
        assert_eq!(discrete(json!(" False ")).fraction, 0.0);
    }
}
