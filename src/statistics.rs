use crate::error::Result;
use crate::family::{CaseAggregate, Family};
use crate::store::StoredEntry;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ROLLUP_CHECKPOINT_ID: &str = "statistics-rollup";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningStat {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStat {
    pub fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn fold(stat: &mut Option<RunningStat>, value: f64) {
        match stat {
            Some(stat) => stat.push(value),
            None => *stat = Some(Self::first(value)),
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Costs till grant of all cases sharing a name and an age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantTimeRow {
    pub age: i32,
    pub case_type: String,
    pub attorney: String,
    pub stat: RunningStat,
}

/// Costs in one bin offset of all cases sharing a name and an age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyRow {
    pub age: i32,
    pub case_type: String,
    pub attorney: String,
    pub cases: u64,
    pub granted: u64,
    /// Only bins up to the grant take part.
    pub stat: Option<RunningStat>,
}

/// Rollup state of a statistics run.
///
/// Owned by the caller of the emission stage and passed in by reference. Between
/// invocations it is checkpointed as a store entry so a run spanning several
/// invocations still flushes complete tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsAccumulator {
    /// name → age → row
    pub grant_time: BTreeMap<String, BTreeMap<i32, GrantTimeRow>>,
    /// `age_name` → offset → row
    pub yearly: BTreeMap<String, BTreeMap<usize, YearlyRow>>,
    pub families: u64,
}

impl StoredEntry for StatisticsAccumulator {
    fn entry_id(&self) -> String {
        ROLLUP_CHECKPOINT_ID.to_string()
    }

    fn reference(&self) -> &str {
        ROLLUP_CHECKPOINT_ID
    }
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.grant_time.is_empty() && self.yearly.is_empty()
    }

    /// Folds every case of a meta-derived family into the rollups.
    pub fn add_family(&mut self, family: &Family) {
        for case in family.cases.values() {
            self.add_case(case);
        }
        self.families += 1;
    }

    fn add_case(&mut self, case: &CaseAggregate) {
        let meta = &case.meta;
        if meta.sum_till_grant > 0.0 {
            let rows = self.grant_time.entry(meta.name.clone()).or_default();
            match rows.get_mut(&case.age_in_years) {
                Some(row) => row.stat.push(meta.sum_till_grant),
                None => {
                    rows.insert(
                        case.age_in_years,
                        GrantTimeRow {
                            age: case.age_in_years,
                            case_type: meta.case_type.clone(),
                            attorney: meta.attorney.clone(),
                            stat: RunningStat::first(meta.sum_till_grant),
                        },
                    );
                }
            }
        }

        let key = format!("{}_{}", case.age_in_years, meta.name);
        let rows = self.yearly.entry(key).or_default();
        for (offset, value) in case.bins.iter() {
            let row = rows.entry(offset).or_insert_with(|| YearlyRow {
                age: case.age_in_years,
                case_type: meta.case_type.clone(),
                attorney: meta.attorney.clone(),
                cases: 0,
                granted: 0,
                stat: None,
            });
            row.cases += 1;
            let offset = offset as i32;
            if offset <= case.grant_offset {
                RunningStat::fold(&mut row.stat, value);
            }
            if offset >= case.grant_offset || case.validation {
                row.granted += 1;
            }
        }
    }

    /// Writes both tables to `sink` and resets the accumulator.
    pub fn flush(
        &mut self,
        sink: &mut dyn TabularSink,
        grant_dataset: &str,
        yearly_dataset: &str,
    ) -> Result<FlushCounts> {
        let mut counts = FlushCounts::default();

        for rows in self.grant_time.values() {
            for row in rows.values() {
                sink.emit_row(
                    grant_dataset,
                    OutputRow::GrantTime(GrantTimeOutput {
                        age: row.age,
                        avg_cost: row.stat.mean(),
                        min_cost: row.stat.min,
                        max_cost: row.stat.max,
                        sample_count: row.stat.count,
                        case_type: row.case_type.clone(),
                        attorney: row.attorney.clone(),
                    }),
                )?;
                counts.grant_time += 1;
            }
        }

        for rows in self.yearly.values() {
            for (offset, row) in rows {
                let stat = row.stat.unwrap_or(RunningStat {
                    count: 0,
                    sum: 0.0,
                    min: 0.0,
                    max: 0.0,
                });
                sink.emit_row(
                    yearly_dataset,
                    OutputRow::Yearly(YearlyOutput {
                        year: *offset,
                        avg_cost: stat.mean(),
                        min_cost: stat.min,
                        max_cost: stat.max,
                        sample_count: stat.count,
                        percent_granted: 100.0 * row.granted as f64 / row.cases as f64,
                        case_type: row.case_type.clone(),
                        age: row.age,
                        attorney: row.attorney.clone(),
                    }),
                )?;
                counts.yearly += 1;
            }
        }

        info!(
            "Flushed statistics of {} families: {} cost-to-grant rows, {} yearly rows",
            self.families, counts.grant_time, counts.yearly
        );
        *self = Self::default();
        Ok(counts)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushCounts {
    pub grant_time: usize,
    pub yearly: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantTimeOutput {
    pub age: i32,
    pub avg_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
    pub sample_count: u64,
    pub case_type: String,
    pub attorney: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyOutput {
    pub year: usize,
    pub avg_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
    pub sample_count: u64,
    pub percent_granted: f64,
    pub case_type: String,
    pub age: i32,
    pub attorney: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum OutputRow {
    GrantTime(GrantTimeOutput),
    Yearly(YearlyOutput),
}

/// Receiver of the flushed rollup rows.
pub trait TabularSink {
    fn emit_row(&mut self, dataset: &str, row: OutputRow) -> Result<()>;
}

/// Collects emitted rows per dataset.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub datasets: BTreeMap<String, Vec<OutputRow>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, dataset: &str) -> &[OutputRow] {
        self.datasets.get(dataset).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl TabularSink for MemorySink {
    fn emit_row(&mut self, dataset: &str, row: OutputRow) -> Result<()> {
        debug!("{}: {:?}", dataset, row);
        self.datasets.entry(dataset.to_string()).or_default().push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{Bins, CaseMeta};
    use crate::schema::BinUnit;
    use chrono::NaiveDate;

    fn case(reference: &str, grant_offset: i32, validation: bool, costs: &[(usize, f64)]) -> CaseAggregate {
        let mut bins = Bins::new(BinUnit::Years);
        for &(offset, amount) in costs {
            bins.add(offset, amount);
        }
        let sum_till_grant: f64 = bins
            .iter()
            .filter(|(offset, _)| (*offset as i32) <= grant_offset && grant_offset < 21)
            .map(|(_, value)| value)
            .sum();
        CaseAggregate {
            reference: reference.to_string(),
            base_date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            grant_date: None,
            first_application: true,
            age_in_years: 8,
            grant_offset,
            category: "Fh I".to_string(),
            region: "EP".to_string(),
            country: String::new(),
            pct: false,
            validation,
            sum: bins.total(),
            category_costs: BTreeMap::new(),
            bins,
            meta: CaseMeta {
                sum_till_grant,
                case_type: "EP--".to_string(),
                attorney: "Alpha".to_string(),
                name: "EP--_Fh-I_abcd1234".to_string(),
                ..Default::default()
            },
        }
    }

    fn family(cases: Vec<CaseAggregate>) -> Family {
        let mut family = Family::new("P100");
        for case in cases {
            family.cases.insert(case.reference.clone(), case);
        }
        family
    }

    #[test]
    fn test_grant_time_rows_merge_by_name_and_age() {
        let mut acc = StatisticsAccumulator::new();
        acc.add_family(&family(vec![
            case("P100EP", 2, false, &[(0, 100.0), (2, 50.0)]),
            case("P101EP", 3, false, &[(1, 400.0)]),
            case("P102EP", 21, false, &[(1, 999.0)]),
        ]));

        let rows = &acc.grant_time["EP--_Fh-I_abcd1234"];
        assert_eq!(rows.len(), 1);
        let stat = rows[&8].stat;
        assert_eq!(stat.count, 2);
        assert_eq!(stat.sum, 550.0);
        assert_eq!(stat.min, 150.0);
        assert_eq!(stat.max, 400.0);
    }

    #[test]
    fn test_yearly_rows_track_grant_rate() {
        let mut acc = StatisticsAccumulator::new();
        acc.add_family(&family(vec![
            case("P100EP", 1, false, &[(0, 100.0), (1, 20.0), (2, 5.0)]),
            case("P101EP", 21, false, &[(0, 300.0)]),
        ]));

        let rows = &acc.yearly["8_EP--_Fh-I_abcd1234"];
        assert_eq!(rows.len(), 21);

        let year0 = &rows[&0];
        assert_eq!(year0.cases, 2);
        assert_eq!(year0.granted, 0);
        assert_eq!(year0.stat.unwrap().sum, 400.0);

        let year1 = &rows[&1];
        assert_eq!(year1.granted, 1);
        assert_eq!(year1.stat.unwrap().count, 2);

        // Past the grant only the ungranted case still contributes costs
        let year2 = &rows[&2];
        assert_eq!(year2.stat.unwrap().count, 1);
        assert_eq!(year2.stat.unwrap().sum, 0.0);
    }

    #[test]
    fn test_validation_cases_count_as_granted() {
        let mut acc = StatisticsAccumulator::new();
        acc.add_family(&family(vec![case("P100EPDE", 21, true, &[(0, 10.0)])]));
        let rows = &acc.yearly["8_EP--_Fh-I_abcd1234"];
        assert!(rows.values().all(|row| row.granted == 1));
    }

    #[test]
    fn test_flush_emits_rows_and_resets() {
        let mut acc = StatisticsAccumulator::new();
        acc.add_family(&family(vec![case("P100EP", 1, false, &[(0, 100.0), (1, 20.0)])]));
        let mut sink = MemorySink::new();

        let counts = acc.flush(&mut sink, "grant", "yearly").unwrap();
        assert_eq!(counts, FlushCounts { grant_time: 1, yearly: 21 });
        assert!(acc.is_empty());
        assert_eq!(acc.families, 0);

        match &sink.rows("grant")[0] {
            OutputRow::GrantTime(row) => {
                assert_eq!(row.sample_count, 1);
                assert_eq!(row.avg_cost, 120.0);
                assert_eq!(row.age, 8);
            }
            other => panic!("unexpected row {:?}", other),
        }
        match &sink.rows("yearly")[1] {
            OutputRow::Yearly(row) => {
                assert_eq!(row.year, 1);
                assert_eq!(row.percent_granted, 100.0);
                assert_eq!(row.avg_cost, 20.0);
            }
            other => panic!("unexpected row {:?}", other),
        }
    }
}
