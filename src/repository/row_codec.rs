// ==========================================
// 管道施工进度引擎 - 行映射公共函数
// ==========================================
// 时间戳 / JSON / 枚举文本与 SQLite TEXT 列之间的转换
// ==========================================

use crate::domain::types::DimensionKind;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// 时间戳存储格式 (小数秒为 0 时省略, 字典序与时间序一致)
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 枚举文本 → 枚举, 未知值视为数据错误
pub fn parse_enum<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        let msg: Box<dyn std::error::Error + Send + Sync> = format!("未知枚举值: {}", raw).into();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg)
    })
}

/// 维度 → component 表中的列名
pub fn dimension_column(dimension: DimensionKind) -> &'static str {
    match dimension {
        DimensionKind::Area => "area_id",
        DimensionKind::System => "system_id",
        DimensionKind::TestPackage => "test_package_id",
        DimensionKind::Welder => "welder_id",
        DimensionKind::Project => "project_id",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_text_round_trip_keeps_order() {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let later = base + chrono::Duration::milliseconds(500);
        let a = format_ts(&base);
        let b = format_ts(&later);
        assert_eq!(a, "2025-01-01 00:00:00");
        assert!(a < b);
        assert_eq!(parse_ts(0, &b).unwrap(), later);
    }

    #[test]
    fn test_unknown_enum_text_is_error() {
        assert!(parse_enum(2, "BOGUS", DimensionKind::from_str).is_err());
        assert_eq!(parse_enum(2, "AREA", DimensionKind::from_str).unwrap(), DimensionKind::Area);
    }
}
