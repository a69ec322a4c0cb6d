// ==========================================
// 管道施工进度引擎 - 命令行入口
// ==========================================
// 用法:
//   construction-progress aggregates <project_id> <AREA|SYSTEM|TEST_PACKAGE|WELDER|PROJECT>
//   construction-progress delta <project_id> <start> <end> [FORWARD_ONLY|NET]
//   construction-progress audit <project_id> [tolerance_pp]
//   construction-progress refresh-view <project_id> <dimension>
//   construction-progress load-catalog <catalog.csv>
// 数据库: CONSTRUCTION_PROGRESS_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context};
use chrono::{NaiveDate, NaiveDateTime};
use construction_progress::app::{get_default_db_path, AppState};
use construction_progress::config::read_catalog_definitions;
use construction_progress::domain::EventScope;
use construction_progress::{logging, DeltaMode, DimensionKind};
use serde::Serialize;

const USAGE: &str = "用法: construction-progress <aggregates|delta|audit|refresh-view|load-catalog> ...";

fn parse_time(raw: &str) -> anyhow::Result<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("无法解析时间: {}", raw))?;
    date.and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("无法解析时间: {}", raw))
}

fn parse_dimension(raw: &str) -> anyhow::Result<DimensionKind> {
    DimensionKind::from_str(raw).ok_or_else(|| anyhow!("未知维度: {}", raw))
}

fn arg<'a>(args: &'a [String], idx: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("缺少参数 <{}>\n{}", name, USAGE))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = arg(&args, 0, "command")?;

    let db_path = get_default_db_path();
    tracing::info!("{} v{}", construction_progress::APP_NAME, construction_progress::VERSION);
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path)?;
    let api = state.progress_api.clone();

    match command {
        "aggregates" => {
            let project_id = arg(&args, 1, "project_id")?;
            let dimension = parse_dimension(arg(&args, 2, "dimension")?)?;
            print_json(&api.compute_aggregates(project_id, dimension).await?)?;
        }
        "delta" => {
            let project_id = arg(&args, 1, "project_id")?;
            let start = parse_time(arg(&args, 2, "start")?)?;
            let end = parse_time(arg(&args, 3, "end")?)?;
            let mode = match args.get(4) {
                Some(raw) => Some(DeltaMode::from_str(raw).ok_or_else(|| anyhow!("未知口径: {}", raw))?),
                None => None,
            };
            let scope = EventScope::Project(project_id.to_string());
            print_json(&api.compute_delta(&scope, Some(start), Some(end), mode).await?)?;
        }
        "audit" => {
            let project_id = arg(&args, 1, "project_id")?;
            let tolerance = match args.get(2) {
                Some(raw) => Some(raw.parse::<f64>().with_context(|| format!("容差无效: {}", raw))?),
                None => None,
            };
            print_json(&api.run_audit(project_id, tolerance, None).await?)?;
        }
        "refresh-view" => {
            let project_id = arg(&args, 1, "project_id")?;
            let dimension = parse_dimension(arg(&args, 2, "dimension")?)?;
            let rows = api.refresh_materialized_view(project_id, dimension).await?;
            println!("已刷新 {} 行", rows.len());
        }
        "load-catalog" => {
            let path = arg(&args, 1, "catalog.csv")?;
            let file = std::fs::File::open(path).with_context(|| format!("无法打开目录文件: {}", path))?;
            let definitions = read_catalog_definitions(file)?;
            let count = api.install_catalog(definitions).await?;
            println!("已保存 {} 个里程碑定义", count);
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}
