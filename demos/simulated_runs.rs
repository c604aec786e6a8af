use chrono::{Datelike, Months, NaiveDate};
use patent_cost_timeline::*;

fn main() {
    let config = PipelineConfig {
        time_budget_ms: 5,
        today: NaiveDate::from_ymd_opt(2024, 6, 30),
        ..Default::default()
    };

    let mut cases = Vec::new();
    let mut costs = Vec::new();
    for family in 0..200u32 {
        let filed = NaiveDate::from_ymd_opt(2008 + (family % 14) as i32, 1 + family % 12, 1).unwrap();
        let granted = (family % 3 != 0).then(|| filed + Months::new(30 + family % 24));
        let number = format!("{}{:04}", filed.year(), family);

        for (suffix, offset_months) in [("EP", 0u32), ("US", 12)] {
            let reference = format!("P{number}{suffix}");
            let base = filed + Months::new(offset_months);
            cases.push(CaseRecord {
                reference: reference.clone(),
                priority_date: filed,
                base_date: base,
                grant_date: granted,
                category: if family % 2 == 0 { "Fh I" } else { "Fh II" }.to_string(),
            });
            for year in 0..6u32 {
                costs.push(CostRecord {
                    id: format!("{reference}-{year}"),
                    case_reference: reference.clone(),
                    date: base + Months::new(12 * year + 2),
                    amount: 400.0 + 150.0 * year as f64,
                    category: if family % 5 == 0 { "Miller & Co" } else { "Office North" }.to_string(),
                });
            }
        }
    }

    let cases = MemoryStore::from_records(cases);
    let costs = MemoryStore::from_records(costs);
    let mut cache: MemoryStore<CacheEntry> = MemoryStore::new();
    let mut rollups: MemoryStore<StatisticsAccumulator> = MemoryStore::new();
    let mut sink = MemorySink::new();
    let mut stores = PipelineStores {
        cases: &cases,
        costs: &costs,
        cache: &mut cache,
        rollups: &mut rollups,
        output: &mut sink,
    };

    let summaries = StatisticsProcessor::run_to_completion(&config, &mut stores, 1_000)
        .expect("pipeline run failed");
    for summary in &summaries {
        println!(
            "{:<20} processed={:<4} skipped={:<4} issues={:<3} {}ms{}",
            summary.label,
            summary.processed,
            summary.skipped,
            summary.issues.len(),
            summary.elapsed_ms,
            if summary.budget_exhausted { " (budget)" } else { "" }
        );
    }

    println!();
    for row in sink.rows(&config.grant_time_dataset) {
        if let OutputRow::GrantTime(row) = row {
            println!(
                "{:<8} age {:>2}: avg {:>9.2} min {:>9.2} max {:>9.2} n={:<3} {}",
                row.case_type, row.age, row.avg_cost, row.min_cost, row.max_cost, row.sample_count, row.attorney
            );
        }
    }
    println!(
        "\n{} yearly rows written to '{}'",
        sink.rows(&config.yearly_dataset).len(),
        config.yearly_dataset
    );
}
