use crate::error::{PipelineError, Result};
use crate::utils::DateDiff;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CaseRecord {
    #[schemars(description = "Office reference of the case, e.g. 'P201900123EPDE'")]
    pub reference: String,

    #[schemars(description = "Earliest priority date claimed by the family")]
    pub priority_date: NaiveDate,

    #[schemars(description = "Application (filing) date of this case")]
    pub base_date: NaiveDate,

    #[schemars(description = "Grant date, absent while the case is pending or if it never granted")]
    #[serde(default)]
    pub grant_date: Option<NaiveDate>,

    #[schemars(description = "Organisational category of the case (cost centre, code path)")]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CostRecord {
    #[schemars(description = "Identity of the ledger entry in the store")]
    pub id: String,

    #[schemars(description = "Reference of the case the cost was booked on")]
    pub case_reference: String,

    #[schemars(description = "Invoice date")]
    pub date: NaiveDate,

    #[schemars(description = "Invoice amount")]
    pub amount: f64,

    #[schemars(description = "Payee of the cost, typically the attorney firm")]
    pub category: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum BinUnit {
    #[default]
    #[schemars(description = "One bin per elapsed year, offsets 0..=20")]
    Years,

    #[schemars(description = "One bin per elapsed month, offsets 0..=240")]
    Months,
}

impl BinUnit {
    /// Number of cells in a bin array of this unit.
    pub fn len(self) -> usize {
        match self {
            BinUnit::Years => 21,
            BinUnit::Months => 241,
        }
    }

    /// Offset used for cases that never granted.
    pub fn never_granted(self) -> i32 {
        self.len() as i32
    }

    pub fn offset(self, diff: DateDiff) -> i32 {
        match self {
            BinUnit::Years => diff.years,
            BinUnit::Months => diff.months,
        }
    }

    /// Whole years covered by `offset` bins of this unit.
    pub fn to_years(self, offset: usize) -> usize {
        match self {
            BinUnit::Years => offset,
            BinUnit::Months => offset / 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[schemars(description = "Granularity of the cost timelines")]
    #[serde(default)]
    pub bins: BinUnit,

    #[schemars(
        description = "If true, families without any case granted inside the bin range are dropped during ingestion"
    )]
    #[serde(default)]
    pub skip_ungranted: bool,

    #[schemars(
        description = "Wall-clock budget of one invocation in milliseconds. Checked after every processed cache entry."
    )]
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    #[schemars(description = "Reference date for case ages. Defaults to the local date of the invocation.")]
    #[serde(default)]
    pub today: Option<NaiveDate>,

    #[schemars(description = "Name of the output dataset receiving cost-to-grant rows")]
    #[serde(default = "default_grant_dataset")]
    pub grant_time_dataset: String,

    #[schemars(description = "Name of the output dataset receiving yearly cost and grant-rate rows")]
    #[serde(default = "default_yearly_dataset")]
    pub yearly_dataset: String,
}

fn default_time_budget_ms() -> u64 {
    10_000
}

fn default_grant_dataset() -> String {
    "Costs till grant".to_string()
}

fn default_yearly_dataset() -> String {
    "Yearly costs".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bins: BinUnit::default(),
            skip_ungranted: false,
            time_budget_ms: default_time_budget_ms(),
            today: None,
            grant_time_dataset: default_grant_dataset(),
            yearly_dataset: default_yearly_dataset(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grant_time_dataset.trim().is_empty() || self.yearly_dataset.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "output dataset names must not be empty".to_string(),
            ));
        }
        if self.grant_time_dataset == self.yearly_dataset {
            return Err(PipelineError::InvalidConfig(format!(
                "both rollups would be written to the same dataset '{}'",
                self.yearly_dataset
            )));
        }
        Ok(())
    }

    /// The date ages are measured against.
    pub fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = PipelineConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("skip_ungranted"));
        assert!(schema_json.contains("time_budget_ms"));
        assert!(schema_json.contains("bins"));
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.bins, BinUnit::Years);
        assert!(!config.skip_ungranted);
        assert_eq!(config.time_budget_ms, 10_000);
        assert!(config.today.is_none());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "bins": "Months",
            "skip_ungranted": true,
            "time_budget_ms": 60000,
            "today": "2024-06-30"
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.bins, BinUnit::Months);
        assert!(config.skip_ungranted);
        assert_eq!(config.time_budget_ms, 60_000);
        assert_eq!(config.today(), NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }

    #[test]
    fn test_config_rejects_shared_dataset() {
        let json = r#"{ "grant_time_dataset": "out", "yearly_dataset": "out" }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bin_unit_geometry() {
        assert_eq!(BinUnit::Years.len(), 21);
        assert_eq!(BinUnit::Months.len(), 241);
        assert_eq!(BinUnit::Years.never_granted(), 21);
        assert_eq!(BinUnit::Months.to_years(47), 3);
        assert_eq!(BinUnit::Months.to_years(48), 4);
        let diff = DateDiff { years: 1, months: 14 };
        assert_eq!(BinUnit::Years.offset(diff), 1);
        assert_eq!(BinUnit::Months.offset(diff), 14);
    }
}
