//! Export
//!
//! ダッシュボード状態の JSON / CSV エクスポート

use crate::analytics::{ActivityPrediction, RingBuffer};
use crate::error::Result;
use crate::monitoring::{AccumulatorSnapshot, ArchivedSample};
use crate::protocol::{BusinessKpis, SystemMetrics, UserActivity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// ストリームごとのバッファ内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub user_activity: Vec<UserActivity>,
    pub system_metrics: Vec<SystemMetrics>,
    pub business_kpis: Vec<BusinessKpis>,
}

/// 現在の予測値
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub activity: Option<ActivityPrediction>,
    /// フィールドごとのEMA値
    pub system: BTreeMap<String, f64>,
}

/// エクスポートスナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: AccumulatorSnapshot,
    pub chart_data: ChartData,
    pub predictions: PredictionSet,
}

impl ExportSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON ファイルとして書き出す
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

/// アーカイブを `Timestamp,Type,Payload` 形式の CSV に変換
pub fn archive_to_csv(archive: &RingBuffer<ArchivedSample>) -> Result<String> {
    let mut csv = String::from("Timestamp,Type,Payload\n");
    for entry in archive.iter() {
        let payload = serde_json::to_string(&entry.sample)?;
        let row = [
            entry.received_at.to_rfc3339(),
            entry.sample.kind().wire_name().to_string(),
            payload,
        ];
        let quoted: Vec<String> = row.iter().map(|field| quote(field)).collect();
        csv.push_str(&quoted.join(","));
        csv.push('\n');
    }
    Ok(csv)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
