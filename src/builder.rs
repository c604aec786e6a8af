use crate::error::RunIssue;
use crate::family::{Bins, CaseAggregate, Family, FamilyInfo};
use crate::reference::ReferenceParser;
use crate::schema::{BinUnit, CaseRecord, PipelineConfig};
use crate::store::Selector;
use crate::utils::{age_in_years, date_diff};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};

/// Streaming grouper turning reference-sorted case records into families.
///
/// Cases are grouped while consecutive records share a family key, so the
/// input must be sorted by reference. A key that shows up again after its
/// family was finalized starts a second family with the same key and is
/// reported as [`RunIssue::UnsortedInputDetected`].
///
/// Every finalized family key is remembered for the whole pass, so memory
/// grows with the number of families in the input. Family keys of
/// reference-sorted input are not themselves sorted (`P1000EP` precedes
/// `P100EP`), so only a repeated key counts as unsorted.
pub struct FamilyBuilder<'a> {
    parser: &'a dyn ReferenceParser,
    bins: BinUnit,
    skip_ungranted: bool,
    today: NaiveDate,
    current: Option<Family>,
    finalized: HashSet<String>,
    issues: Vec<RunIssue>,
    dropped: usize,
}

impl<'a> FamilyBuilder<'a> {
    pub fn new(config: &PipelineConfig, parser: &'a dyn ReferenceParser) -> Self {
        Self {
            parser,
            bins: config.bins,
            skip_ungranted: config.skip_ungranted,
            today: config.today(),
            current: None,
            finalized: HashSet::new(),
            issues: Vec::new(),
            dropped: 0,
        }
    }

    /// Feeds one case. Returns the previous family when this case starts a new one
    /// and the previous family is worth persisting.
    pub fn push(&mut self, case: &CaseRecord) -> Option<Family> {
        let parsed = self.parser.parse(&case.reference);
        if !parsed.is_valid {
            warn!("Skipping case with invalid reference '{}'", case.reference);
            self.issues.push(RunIssue::InvalidReference {
                reference: case.reference.clone(),
            });
            return None;
        }

        let key = parsed.family_key();
        let mut completed = None;
        if self.current.as_ref().map(|f| f.key.as_str()) != Some(key.as_str()) {
            completed = self.take_current();
            if self.finalized.contains(&key) {
                warn!("Family {} re-appeared after it was finalized", key);
                self.issues
                    .push(RunIssue::UnsortedInputDetected { family: key.clone() });
            }
            self.current = Some(Family::new(key.clone()));
        }

        let bins = self.bins;
        let today = self.today;
        let Some(family) = self.current.as_mut() else {
            return completed;
        };

        let info = family.info.get_or_insert_with(|| FamilyInfo {
            priority_date: case.priority_date,
            category: case.category.clone(),
            cost_pattern: Selector::Family(key.clone()),
            bins,
            granted: false,
            sum: 0.0,
            category_costs: BTreeMap::new(),
            date_pct: None,
        });

        let age = age_in_years(case.base_date, today);
        if age < 0 {
            debug!(
                "Case {} is dated in the future ({}), not added",
                parsed.office_ref, case.base_date
            );
            return completed;
        }

        let grant_offset = case
            .grant_date
            .map(|grant| bins.offset(date_diff(case.base_date, grant)))
            .unwrap_or_else(|| bins.never_granted());

        let aggregate = CaseAggregate {
            reference: parsed.office_ref.clone(),
            base_date: case.base_date,
            grant_date: case.grant_date,
            first_application: case.priority_date == case.base_date,
            age_in_years: age,
            grant_offset,
            category: case.category.clone(),
            region: parsed.region.clone(),
            country: parsed.country.clone(),
            pct: parsed.is_international(),
            validation: parsed.is_validation(),
            sum: 0.0,
            category_costs: BTreeMap::new(),
            bins: Bins::new(bins),
            meta: Default::default(),
        };

        if aggregate.pct {
            info.date_pct = Some(case.base_date);
        }
        if aggregate.is_granted() {
            info.granted = true;
        }

        family.cases.insert(parsed.office_ref, aggregate);
        completed
    }

    /// Flushes the family still in progress. Must be called once the input ends.
    pub fn finish(&mut self) -> Option<Family> {
        self.take_current()
    }

    pub fn issues(&self) -> &[RunIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<RunIssue> {
        self.issues
    }

    /// Families dropped because they had no usable case or, by policy, no grant.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn take_current(&mut self) -> Option<Family> {
        let family = self.current.take()?;
        self.finalized.insert(family.key.clone());

        if family.is_empty() {
            debug!("Dropping family {} without usable cases", family.key);
            self.dropped += 1;
            return None;
        }
        if self.skip_ungranted && !family.is_granted() {
            debug!("Dropping ungranted family {}", family.key);
            self.dropped += 1;
            return None;
        }
        Some(family)
    }
}
