use crate::family::{CaseAggregate, Family, FamilyInfo};
use crate::utils::{normalize_name, short_hash};
use log::debug;

/// Years without any recorded cost after which a national-phase case entered
/// from an international application is taken for a divisional.
const PCT_PHASE_GAP_YEARS: usize = 3;
/// Same gap for every other non-validation case.
const DIRECT_FILING_GAP_YEARS: usize = 1;

/// Derives the per-case attributes the statistics are keyed by.
pub fn derive_meta(family: &mut Family) {
    let Some(info) = family.info.as_ref() else {
        return;
    };
    let attorney = attorney_label(info);

    for case in family.cases.values_mut() {
        derive_case(case, info, &attorney);
        debug!(
            "Case {}: name {}, till grant {:.2}",
            case.reference, case.meta.name, case.meta.sum_till_grant
        );
    }
}

fn derive_case(case: &mut CaseAggregate, info: &FamilyInfo, attorney: &str) {
    let is_pct_phase = info.date_pct == Some(case.base_date);
    let unit = case.bins.unit();
    let granted = case.is_granted();

    let mut sum = 0.0;
    let mut sum_till_grant = 0.0;
    let mut divisional = false;
    for (offset, value) in case.bins.iter() {
        let years = unit.to_years(offset);
        if !case.validation && sum == 0.0 {
            let gap = if is_pct_phase {
                PCT_PHASE_GAP_YEARS
            } else {
                DIRECT_FILING_GAP_YEARS
            };
            if years > gap {
                divisional = true;
            }
        }
        if granted && offset as i32 <= case.grant_offset {
            sum_till_grant += value;
        }
        sum += value;
    }

    let case_type = format!(
        "{}{}{}",
        case.country,
        case.region,
        if divisional { "dv" } else { "--" }
    );
    let name = normalize_name(&format!(
        "{}_{}_{}",
        case_type,
        info.category,
        short_hash(attorney)
    ));

    case.meta.is_pct_phase = is_pct_phase;
    case.meta.divisional = divisional;
    case.meta.sum_till_grant = sum_till_grant;
    case.meta.case_type = case_type;
    case.meta.attorney = attorney.to_string();
    case.meta.name = name;
}

/// Cost categories of the family, sorted and joined with `" | "`.
fn attorney_label(info: &FamilyInfo) -> String {
    info.category_costs
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}
