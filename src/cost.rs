use crate::error::{Result, RunIssue};
use crate::family::Family;
use crate::reference::ReferenceParser;
use crate::schema::CostRecord;
use crate::store::{EntryStore, Selector};
use crate::utils::date_diff;
use log::{debug, warn};

/// Books every cost record matching the family pattern onto the family and its
/// cases. Returns the number of cost records read.
pub fn aggregate_costs(
    family: &mut Family,
    costs: &dyn EntryStore<CostRecord>,
    parser: &dyn ReferenceParser,
    issues: &mut Vec<RunIssue>,
) -> Result<usize> {
    let pattern = match &family.info {
        Some(info) => info.cost_pattern.clone(),
        None => Selector::Family(family.key.clone()),
    };

    let mut seen = 0;
    for cost in costs.iterate(&pattern)? {
        seen += 1;
        book_cost(family, &cost, parser, issues);
    }

    debug!("Family {}: {} cost records booked", family.key, seen);
    Ok(seen)
}

fn book_cost(
    family: &mut Family,
    cost: &CostRecord,
    parser: &dyn ReferenceParser,
    issues: &mut Vec<RunIssue>,
) {
    let parsed = parser.parse(&cost.case_reference);
    if !parsed.is_valid {
        issues.push(RunIssue::InvalidReference {
            reference: cost.case_reference.clone(),
        });
        return;
    }

    if let Some(info) = family.info.as_mut() {
        info.sum += cost.amount;
        *info.category_costs.entry(cost.category.clone()).or_insert(0.0) += cost.amount;
    }

    let Some(case) = family.cases.get_mut(&parsed.office_ref) else {
        warn!(
            "Cost record {} ({}) has no case in family {}",
            cost.id, cost.case_reference, family.key
        );
        issues.push(RunIssue::UnmatchedCostRecord {
            record_id: cost.id.clone(),
            reference: cost.case_reference.clone(),
            family: family.key.clone(),
        });
        return;
    };

    let unit = case.bins.unit();
    let offset = unit.offset(date_diff(case.reference_date(), cost.date)).max(0);
    if !case.bins.add(offset as usize, cost.amount) {
        warn!(
            "Cost record {} lands in bin {} of case {}, dropped",
            cost.id, offset, case.reference
        );
        issues.push(RunIssue::InvalidBinOffset {
            record_id: cost.id.clone(),
            case: case.reference.clone(),
            offset,
            bins: case.bins.len(),
        });
        return;
    }

    *case.category_costs.entry(cost.category.clone()).or_insert(0.0) += cost.amount;
    case.sum += cost.amount;
}
