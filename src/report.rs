//! JSON export of cached analysis results.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::{BaselineModel, CachedCharacterStat, CachedSynergyStat, TierScope};
use crate::storage::{StorageError, Store};

/// Version of the statistical methodology behind exported numbers.
pub const METHODOLOGY_VERSION: &str = "2.0";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Synergies grouped under one character, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSynergyExport {
    pub character: String,
    pub synergies: Vec<CachedSynergyStat>,
}

/// Exported document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub methodology_version: String,
    pub baseline_model: BaselineModel,
    pub exported_at: DateTime<Utc>,
    pub collection: BTreeMap<String, String>,
    pub win_rates: Vec<CachedCharacterStat>,
    pub synergies: Vec<CharacterSynergyExport>,
}

/// Gather cached rows into an export document.
///
/// Every pair is listed under both of its characters so each character's
/// section is complete on its own.
pub fn build_export(
    store: &Store,
    baseline: BaselineModel,
    tier: Option<&TierScope>,
) -> Result<ExportDocument, ReportError> {
    let win_rates = store.character_stats(tier)?;

    let mut grouped: BTreeMap<String, Vec<CachedSynergyStat>> = BTreeMap::new();
    for row in store.synergy_stats(tier)? {
        grouped
            .entry(row.character_b.clone())
            .or_default()
            .push(row.clone());
        grouped.entry(row.character_a.clone()).or_default().push(row);
    }

    let synergies = grouped
        .into_iter()
        .map(|(character, mut synergies)| {
            synergies.sort_by(|a, b| {
                b.synergy_score
                    .total_cmp(&a.synergy_score)
                    .then_with(|| b.games_together.cmp(&a.games_together))
            });
            CharacterSynergyExport {
                character,
                synergies,
            }
        })
        .collect();

    Ok(ExportDocument {
        methodology_version: METHODOLOGY_VERSION.to_string(),
        baseline_model: baseline,
        exported_at: Utc::now(),
        collection: store.metadata()?,
        win_rates,
        synergies,
    })
}

/// Write a document as pretty-printed JSON, creating parent directories.
pub fn write_json(document: &ExportDocument, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, json)?;

    info!(
        "Exported {} win rates and {} synergy groups to {}",
        document.win_rates.len(),
        document.synergies.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleConfidence;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_character_stats(&[CachedCharacterStat {
                character: "Hulk".to_string(),
                tier: TierScope::All,
                games: 150,
                wins: 80,
                losses: 70,
                win_rate: 0.5333,
                ci_lower: 0.4538,
                ci_upper: 0.6112,
                model_tag: "average".to_string(),
                analyzed_at: Utc::now(),
            }])
            .unwrap();
        store
            .upsert_synergy_stats(&[CachedSynergyStat {
                character_a: "Hulk".to_string(),
                character_b: "Thor".to_string(),
                tier: TierScope::All,
                games_together: 60,
                wins_together: 36,
                win_rate: 0.6,
                expected_win_rate: 0.535,
                synergy_score: 0.065,
                ci_lower: 0.4735,
                ci_upper: 0.7138,
                p_value: 0.3006,
                significant: false,
                significant_bonferroni: false,
                bonferroni_alpha: 0.01,
                confidence: SampleConfidence::Low,
                sample_size_warning: SampleConfidence::Low.warning(60),
                baseline_model: BaselineModel::Average,
                analyzed_at: Utc::now(),
            }])
            .unwrap();
        store.set_metadata("total_matches_collected", "60").unwrap();
        store
    }

    #[test]
    fn test_build_export_groups_pairs_under_both_characters() {
        let doc = build_export(&seeded_store(), BaselineModel::Average, None).unwrap();

        assert_eq!(doc.methodology_version, "2.0");
        assert_eq!(doc.win_rates.len(), 1);
        let characters: Vec<&str> = doc.synergies.iter().map(|s| s.character.as_str()).collect();
        assert_eq!(characters, vec!["Hulk", "Thor"]);
        assert_eq!(doc.collection["total_matches_collected"], "60");
    }

    #[test]
    fn test_write_json_produces_plain_numbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("export.json");
        let doc = build_export(&seeded_store(), BaselineModel::Additive, None).unwrap();

        write_json(&doc, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["baseline_model"], "additive");
        assert_eq!(value["win_rates"][0]["tier"], "all");
        assert!(value["synergies"][0]["synergies"][0]["synergy_score"].is_f64());

        let parsed: ExportDocument = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.win_rates, doc.win_rates);
    }
}
