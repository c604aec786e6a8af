use crate::schema::BinUnit;
use crate::store::Selector;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-size cost accumulators indexed by elapsed years or months.
///
/// The cell count is decided by the [`BinUnit`] at creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bins {
    unit: BinUnit,
    cells: Box<[f64]>,
}

impl Bins {
    pub fn new(unit: BinUnit) -> Self {
        Self {
            unit,
            cells: vec![0.0; unit.len()].into_boxed_slice(),
        }
    }

    pub fn unit(&self) -> BinUnit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, offset: usize) -> Option<f64> {
        self.cells.get(offset).copied()
    }

    /// Adds `amount` to the cell at `offset`. Returns `false` and leaves the
    /// bins untouched when the offset lies outside the array.
    pub fn add(&mut self, offset: usize, amount: f64) -> bool {
        match self.cells.get_mut(offset) {
            Some(cell) => {
                *cell += amount;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells.iter().copied().enumerate()
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyInfo {
    pub priority_date: NaiveDate,
    /// Category of the first case seen for the family.
    pub category: String,
    pub cost_pattern: Selector,
    pub bins: BinUnit,
    /// At least one case granted inside the bin range.
    pub granted: bool,
    /// All costs booked on the family, matched to a case or not.
    pub sum: f64,
    pub category_costs: BTreeMap<String, f64>,
    /// Filing date of the international application, if the family has one.
    pub date_pct: Option<NaiveDate>,
}

/// Attributes filled in by the meta stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMeta {
    pub divisional: bool,
    pub is_pct_phase: bool,
    /// Costs from filing up to and including the grant bin.
    pub sum_till_grant: f64,
    /// `country + region + ("dv" | "--")`
    pub case_type: String,
    pub attorney: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseAggregate {
    pub reference: String,
    pub base_date: NaiveDate,
    pub grant_date: Option<NaiveDate>,
    pub first_application: bool,
    pub age_in_years: i32,
    /// Bin offset of the grant. Equals `BinUnit::never_granted` without a grant.
    pub grant_offset: i32,
    pub category: String,
    pub region: String,
    pub country: String,
    pub pct: bool,
    pub validation: bool,
    pub sum: f64,
    pub category_costs: BTreeMap<String, f64>,
    pub bins: Bins,
    #[serde(default)]
    pub meta: CaseMeta,
}

impl CaseAggregate {
    pub fn is_granted(&self) -> bool {
        self.grant_offset >= 0 && (self.grant_offset as usize) < self.bins.len()
    }

    /// Date cost offsets are measured from. Validations count from the grant
    /// they validate.
    pub fn reference_date(&self) -> NaiveDate {
        if self.validation {
            self.grant_date.unwrap_or(self.base_date)
        } else {
            self.base_date
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub key: String,
    pub info: Option<FamilyInfo>,
    /// Keyed by office reference.
    pub cases: BTreeMap<String, CaseAggregate>,
}

impl Family {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            info: None,
            cases: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn is_granted(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.granted)
    }
}
