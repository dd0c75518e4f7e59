use anyhow::Result;
use clap::ValueEnum;
use serde_json::json;
use shardsum::{JobReport, MergePlan, ShardStats};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    Table,
    /// JSON output.
    Json,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl FieldRow {
    fn new(field: &str, value: impl ToString) -> Self {
        FieldRow {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Print the summary of a finished job.
pub fn print_report(report: &JobReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            let rows = vec![
                FieldRow::new("Job", &report.job_id),
                FieldRow::new("Output", report.output.display()),
                FieldRow::new("Inputs", report.inputs),
                FieldRow::new("Levels", report.levels),
                FieldRow::new("Batches run", report.batches_run),
                FieldRow::new("Batches skipped", report.batches_skipped),
                FieldRow::new("Records read", report.records_read),
                FieldRow::new("Records written", report.records_written),
                FieldRow::new("Records filtered", report.records_filtered),
                FieldRow::new("Resumed", report.resumed),
                FieldRow::new("Elapsed", format!("{} ms", report.elapsed_ms)),
            ];
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            println!("{table}");
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Batch")]
    batch: u32,
    #[tabled(rename = "Inputs")]
    inputs: usize,
    #[tabled(rename = "Output")]
    output: String,
}

/// Print a merge plan.
pub fn print_plan(plan: &MergePlan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(plan)?);
        }
        OutputFormat::Table => {
            let final_level = plan.final_merge.id.level;
            let rows: Vec<BatchRow> = plan
                .batches()
                .map(|batch| BatchRow {
                    level: if batch.id.level == final_level {
                        "final".to_string()
                    } else {
                        batch.id.level.to_string()
                    },
                    batch: batch.id.index,
                    inputs: batch.inputs.len(),
                    output: batch.output.display().to_string(),
                })
                .collect();
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            println!("{table}");
            println!(
                "{} inputs, batch width {}, {} passes, {} merges.",
                plan.input_count,
                plan.batch_width,
                plan.passes(),
                plan.total_batches()
            );
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Shard")]
    shard: String,
    #[tabled(rename = "Records")]
    records: u64,
    #[tabled(rename = "Keys")]
    distinct_keys: u64,
    #[tabled(rename = "Total")]
    total_count: u64,
    #[tabled(rename = "First key")]
    first_key: String,
    #[tabled(rename = "Last key")]
    last_key: String,
}

/// Print shard statistics.
pub fn print_stats(stats: &[ShardStats], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json_stats: Vec<serde_json::Value> = stats
                .iter()
                .map(|s| {
                    json!({
                        "path": s.path,
                        "compression": s.compression,
                        "records": s.records,
                        "distinct_keys": s.distinct_keys,
                        "total_count": s.total_count,
                        "first_key": s.first_key.as_ref().map(ToString::to_string),
                        "last_key": s.last_key.as_ref().map(ToString::to_string),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_stats)?);
        }
        OutputFormat::Table => {
            let rows: Vec<StatsRow> = stats
                .iter()
                .map(|s| StatsRow {
                    shard: s.path.display().to_string(),
                    records: s.records,
                    distinct_keys: s.distinct_keys,
                    total_count: s.total_count,
                    first_key: s.first_key.as_ref().map(ToString::to_string).unwrap_or_default(),
                    last_key: s.last_key.as_ref().map(ToString::to_string).unwrap_or_default(),
                })
                .collect();
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            println!("{table}");
        }
    }
    Ok(())
}
