use anyhow::{Context, Result};
use chrono::NaiveDate;
use console::style;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::catalog::{CatalogClient, FindFilter, Scene};
use crate::config::Config;
use crate::report::{human_bytes, human_duration};

/// One persisted row of the daily stats file. Sizes and durations are stored
/// humanized, matching the table that is rendered from the same data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatsRow {
    pub date: String,
    #[serde(rename = "averageSize")]
    pub average_size: String,
    #[serde(rename = "averageDuration")]
    pub average_duration: String,
    #[serde(rename = "averageCount")]
    pub average_count: f64,
    #[serde(rename = "totalSize")]
    pub total_size: String,
    #[serde(rename = "totalDuration")]
    pub total_duration: String,
    #[serde(rename = "totalCount")]
    pub total_count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct DayBucket {
    size: u64,
    duration_secs: f64,
    count: u32,
}

impl DayBucket {
    fn add(&mut self, size: u64, duration_secs: f64) {
        self.size += size;
        self.duration_secs += duration_secs;
        self.count += 1;
    }
}

/// Stats mode: aggregate the recent catalog window into per-day and
/// per-performer buckets, persist the daily row, and draw terminal charts.
pub async fn run_stats(config: &Config, full: bool) -> Result<()> {
    let catalog = CatalogClient::new(config.catalog.clone());

    let scenes = catalog
        .find_scenes(
            FindFilter::default()
                .sorted_by("date", "DESC")
                .per_page(1000),
            serde_json::json!({
                "studios": {
                    "depth": 0,
                    "modifier": "INCLUDES",
                    "value": [config.catalog.default_studio_id],
                }
            }),
        )
        .await
        .context("scene query failed")?
        .scenes;

    let Some(latest) = latest_scene_date(&scenes) else {
        info!("no dated scenes in the catalog, nothing to aggregate");
        return Ok(());
    };

    let window_days = config.stats.window_days;
    let (days, performers) = bucket_scenes(&scenes, latest, window_days);

    if days.is_empty() {
        info!("no scenes inside the {window_days}-day window");
        return Ok(());
    }

    let row = daily_row(&days);
    let rows = upsert_csv(&config.stats.dir, row)?;
    write_markdown(&config.stats.dir, &rows, window_days)?;

    // Charts: each performer's daily durations, then the overall series.
    let mut performer_list: Vec<(&String, &BTreeMap<NaiveDate, DayBucket>)> =
        performers.iter().collect();
    performer_list.sort_by_key(|(_, dates)| dates.keys().next_back().copied());

    let recent_cutoff = latest - chrono::Duration::days(7);
    for (index, (name, dates)) in performer_list.iter().enumerate() {
        let last_active = dates.keys().next_back().copied();
        if !full && last_active.map(|d| d < recent_cutoff).unwrap_or(true) {
            continue;
        }

        println!(
            "{}",
            style(format!(
                "── {} [{}/{}] ──",
                name,
                index + 1,
                performer_list.len()
            ))
            .red()
            .bright()
        );
        render_duration_chart(dates);
    }

    println!("{}", style("── Total ──").red().bright());
    render_duration_chart(&days);

    print_recent_rows(&rows);

    Ok(())
}

fn latest_scene_date(scenes: &[Scene]) -> Option<NaiveDate> {
    scenes
        .iter()
        .filter_map(|s| s.date.as_deref())
        .filter_map(parse_date)
        .max()
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

type PerformerBuckets = BTreeMap<String, BTreeMap<NaiveDate, DayBucket>>;

/// Bucket scenes by day and by performer/day inside the rolling window.
fn bucket_scenes(
    scenes: &[Scene],
    latest: NaiveDate,
    window_days: u32,
) -> (BTreeMap<NaiveDate, DayBucket>, PerformerBuckets) {
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    let mut performers: PerformerBuckets = BTreeMap::new();

    for scene in scenes {
        let Some(date) = scene.date.as_deref().and_then(parse_date) else {
            continue;
        };
        let age = (latest - date).num_days();
        if age < 0 || age >= window_days as i64 - 1 {
            continue;
        }

        let (size, duration) = scene
            .files
            .first()
            .map(|f| (f.size, f.duration))
            .unwrap_or((0, 0.0));

        days.entry(date).or_default().add(size, duration);

        for performer in &scene.performers {
            performers
                .entry(performer.name.clone())
                .or_default()
                .entry(date)
                .or_default()
                .add(size, duration);
        }
    }

    (days, performers)
}

/// Collapse the day buckets into one persisted row keyed by the latest date.
fn daily_row(days: &BTreeMap<NaiveDate, DayBucket>) -> DailyStatsRow {
    let day_count = days.len() as f64;
    let total_size: u64 = days.values().map(|b| b.size).sum();
    let total_duration: f64 = days.values().map(|b| b.duration_secs).sum();
    let total_count: u32 = days.values().map(|b| b.count).sum();

    let latest = days
        .keys()
        .next_back()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    DailyStatsRow {
        date: latest,
        average_size: human_bytes((total_size as f64 / day_count) as u64),
        average_duration: human_duration(std::time::Duration::from_secs_f64(
            (total_duration / day_count).max(0.0),
        )),
        average_count: (total_count as f64 / day_count * 100.0).round() / 100.0,
        total_size: human_bytes(total_size),
        total_duration: human_duration(std::time::Duration::from_secs_f64(
            total_duration.max(0.0),
        )),
        total_count,
    }
}

/// Replace-or-append the row keyed by date, rewriting the whole file.
fn upsert_csv(dir: &Path, row: DailyStatsRow) -> Result<Vec<DailyStatsRow>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create {}", dir.display()))?;
    let csv_path = dir.join("stats.csv");

    let mut rows: Vec<DailyStatsRow> = Vec::new();
    if csv_path.exists() {
        let mut reader = csv::Reader::from_path(&csv_path)
            .with_context(|| format!("cannot read {}", csv_path.display()))?;
        for record in reader.deserialize() {
            match record {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!("skipping malformed stats row: {}", e),
            }
        }
    }

    match rows.iter_mut().find(|r| r.date == row.date) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }

    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("cannot write {}", csv_path.display()))?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(rows)
}

fn write_markdown(dir: &Path, rows: &[DailyStatsRow], window_days: u32) -> Result<()> {
    let md_path = dir.join("stats.md");
    let table = markdown_table(rows);
    std::fs::write(
        &md_path,
        format!("# Stats\n\n## {window_days} Day span\n\n{table}"),
    )
    .with_context(|| format!("cannot write {}", md_path.display()))?;
    Ok(())
}

fn markdown_table(rows: &[DailyStatsRow]) -> String {
    let mut out = String::from(
        "|date|averageSize|averageDuration|averageCount|totalSize|totalDuration|totalCount|\n\
         |---|---|---|---|---|---|---|\n",
    );
    for row in rows {
        out.push_str(&format!(
            "|{}|{}|{}|{}|{}|{}|{}|\n",
            row.date,
            row.average_size,
            row.average_duration,
            row.average_count,
            row.total_size,
            row.total_duration,
            row.total_count
        ));
    }
    out
}

/// Horizontal per-day duration bars, longest day at full width.
fn render_duration_chart(days: &BTreeMap<NaiveDate, DayBucket>) {
    const WIDTH: usize = 40;

    let max = days
        .values()
        .map(|b| b.duration_secs)
        .fold(0.0f64, f64::max);
    if max <= 0.0 {
        println!("{}", style("(no recorded duration)").dim());
        return;
    }

    for (date, bucket) in days {
        let filled = ((bucket.duration_secs / max) * WIDTH as f64).round() as usize;
        let bar = "▇".repeat(filled.max(usize::from(bucket.duration_secs > 0.0)));
        let padding = " ".repeat(WIDTH.saturating_sub(filled));
        println!(
            "{} {}{} {}",
            style(date.format("%a %d %b").to_string()).dim(),
            style(bar).green(),
            padding,
            human_duration(std::time::Duration::from_secs_f64(bucket.duration_secs))
        );
    }
}

fn print_recent_rows(rows: &[DailyStatsRow]) {
    let start = rows.len().saturating_sub(10);
    println!(
        "{}",
        style("date         avg size   avg duration  avg count  total").dim()
    );
    for row in &rows[start..] {
        println!(
            "{}   {:<9}  {:<12}  {:<9}  {} / {} ({} files)",
            row.date,
            row.average_size,
            row.average_duration,
            row.average_count,
            row.total_size,
            row.total_duration,
            row.total_count
        );
    }
}
