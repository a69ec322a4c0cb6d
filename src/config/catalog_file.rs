// ==========================================
// 管道施工进度引擎 - 里程碑目录文件加载
// ==========================================
// 格式: CSV, 表头 component_type,version,sequence,milestone,weight,kind,category,aliases
// 别名以 `|` 分隔
// 红线: 任一行无效则整个目录拒绝加载
// ==========================================

use crate::domain::milestone::{MilestoneDefinition, MilestoneSpec};
use crate::domain::types::{ComponentType, MilestoneKind, StandardCategory};
use crate::engine::catalog::MilestoneCatalog;
use crate::engine::error::CatalogError;
use csv::ReaderBuilder;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

const ALIAS_SEPARATOR: char = '|';

const REQUIRED_COLUMNS: [&str; 7] = [
    "component_type",
    "version",
    "sequence",
    "milestone",
    "weight",
    "kind",
    "category",
];

/// 解析目录 CSV 为定义列表 (每个 类型+版本 一个定义, 里程碑按 sequence 排序)
pub fn read_catalog_definitions<R: Read>(source: R) -> Result<Vec<MilestoneDefinition>, CatalogError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CatalogError::Source(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(CatalogError::InvalidField {
                row: 0,
                field: column.to_string(),
                value: "缺少列".to_string(),
            });
        }
    }

    let mut grouped: BTreeMap<(ComponentType, i32), Vec<(i32, MilestoneSpec)>> = BTreeMap::new();

    for (idx, result) in reader.records().enumerate() {
        // 表头为第 1 行
        let row = idx + 2;
        let record = result.map_err(|e| CatalogError::Source(e.to_string()))?;
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            if let Some(header) = headers.get(col_idx) {
                fields.insert(header.as_str(), value);
            }
        }
        if fields.values().all(|v| v.is_empty()) {
            continue;
        }

        let field = |name: &str| fields.get(name).copied().unwrap_or("");
        let invalid = |name: &str| CatalogError::InvalidField {
            row,
            field: name.to_string(),
            value: field(name).to_string(),
        };

        let component_type =
            ComponentType::from_str(field("component_type")).ok_or_else(|| invalid("component_type"))?;
        let version: i32 = field("version").parse().map_err(|_| invalid("version"))?;
        let sequence: i32 = field("sequence").parse().map_err(|_| invalid("sequence"))?;
        let name = field("milestone");
        if name.is_empty() {
            return Err(invalid("milestone"));
        }
        let weight: f64 = field("weight").parse().map_err(|_| invalid("weight"))?;
        let kind = MilestoneKind::from_str(field("kind")).ok_or_else(|| invalid("kind"))?;
        let category = StandardCategory::from_str(field("category")).ok_or_else(|| invalid("category"))?;
        let aliases: Vec<String> = field("aliases")
            .split(ALIAS_SEPARATOR)
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        let mut spec = MilestoneSpec::new(name, weight, kind, category);
        spec.aliases = aliases;
        grouped
            .entry((component_type, version))
            .or_default()
            .push((sequence, spec));
    }

    Ok(grouped
        .into_iter()
        .map(|((component_type, version), mut rows)| {
            rows.sort_by_key(|(sequence, _)| *sequence);
            MilestoneDefinition::new(
                component_type,
                version,
                rows.into_iter().map(|(_, spec)| spec).collect(),
            )
        })
        .collect())
}

/// 每个构件类型取 ≤ version 的最高版本 (None 表示最新)
pub fn select_version(definitions: Vec<MilestoneDefinition>, version: Option<i32>) -> Vec<MilestoneDefinition> {
    let mut latest: BTreeMap<ComponentType, MilestoneDefinition> = BTreeMap::new();
    for definition in definitions {
        if version.map_or(false, |max| definition.version > max) {
            continue;
        }
        match latest.get(&definition.component_type) {
            Some(existing) if existing.version >= definition.version => {}
            _ => {
                latest.insert(definition.component_type, definition);
            }
        }
    }
    latest.into_values().collect()
}

/// 从 CSV 文件加载并校验目录
pub fn load_catalog_file(
    path: &Path,
    version: Option<i32>,
    weight_sum_tolerance: f64,
) -> Result<MilestoneCatalog, CatalogError> {
    let file = File::open(path)
        .map_err(|e| CatalogError::Source(format!("{}: {}", path.display(), e)))?;
    let definitions = select_version(read_catalog_definitions(file)?, version);

    let label = match version {
        Some(v) => format!("{}@v{}", path.display(), v),
        None => format!("{}@latest", path.display()),
    };
    let catalog = MilestoneCatalog::load_with_tolerance(&label, definitions, weight_sum_tolerance)?;
    info!(path = %path.display(), version = %catalog.version_label(), "里程碑目录已加载");
    Ok(catalog)
}
