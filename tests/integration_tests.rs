use chrono::NaiveDate;
use patent_cost_timeline::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn case(reference: &str, base: NaiveDate, grant: Option<NaiveDate>) -> CaseRecord {
    CaseRecord {
        reference: reference.to_string(),
        priority_date: date(2019, 3, 1),
        base_date: base,
        grant_date: grant,
        category: "Fh I".to_string(),
    }
}

fn cost(id: &str, reference: &str, on: NaiveDate, amount: f64) -> CostRecord {
    CostRecord {
        id: id.to_string(),
        case_reference: reference.to_string(),
        date: on,
        amount,
        category: "Miller & Co".to_string(),
    }
}

struct Workspace {
    cases: MemoryStore<CaseRecord>,
    costs: MemoryStore<CostRecord>,
    cache: MemoryStore<CacheEntry>,
    rollups: MemoryStore<StatisticsAccumulator>,
    output: MemorySink,
}

impl Workspace {
    fn new(cases: Vec<CaseRecord>, costs: Vec<CostRecord>) -> Self {
        Self {
            cases: MemoryStore::from_records(cases),
            costs: MemoryStore::from_records(costs),
            cache: MemoryStore::new(),
            rollups: MemoryStore::new(),
            output: MemorySink::new(),
        }
    }

    fn stores(&mut self) -> PipelineStores<'_> {
        PipelineStores {
            cases: &self.cases,
            costs: &self.costs,
            cache: &mut self.cache,
            rollups: &mut self.rollups,
            output: &mut self.output,
        }
    }
}

fn two_case_family() -> Workspace {
    Workspace::new(
        vec![
            case("P2019001EP", date(2019, 3, 1), Some(date(2022, 5, 1))),
            case("P2019001US", date(2020, 3, 1), None),
        ],
        vec![
            cost("k1", "P2019001EP", date(2019, 3, 10), 1200.0),
            cost("k2", "P2019001EP", date(2020, 4, 1), 800.0),
            cost("k3", "P2019001EP", date(2022, 6, 1), 2500.0),
        ],
    )
}

fn config() -> PipelineConfig {
    PipelineConfig {
        today: Some(date(2024, 6, 30)),
        ..Default::default()
    }
}

fn yearly_rows<'a>(sink: &'a MemorySink, config: &PipelineConfig, case_type: &str) -> Vec<&'a YearlyOutput> {
    sink.rows(&config.yearly_dataset)
        .iter()
        .filter_map(|row| match row {
            OutputRow::Yearly(row) if row.case_type == case_type => Some(row),
            _ => None,
        })
        .collect()
}

#[test]
fn test_end_to_end_two_case_family() {
    let config = config();
    let mut workspace = two_case_family();

    let summaries =
        StatisticsProcessor::run_to_completion(&config, &mut workspace.stores(), 10).unwrap();
    let phases: Vec<Phase> = summaries.iter().map(|s| s.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Ingestion,
            Phase::Stage(Stage::CostAggregation),
            Phase::Stage(Stage::MetaDerivation),
            Phase::Stage(Stage::StatisticsEmission),
        ]
    );
    assert!(summaries.iter().all(|s| s.issues.is_empty()));
    assert!(workspace.cache.is_empty());

    let grant_rows = workspace.output.rows(&config.grant_time_dataset);
    assert_eq!(grant_rows.len(), 1);
    match &grant_rows[0] {
        OutputRow::GrantTime(row) => {
            assert_eq!(row.sample_count, 1);
            assert!((row.avg_cost - 4500.0).abs() < 0.01);
            assert_eq!(row.age, 5);
            assert_eq!(row.case_type, "EP--");
            assert_eq!(row.attorney, "Miller & Co");
        }
        other => panic!("unexpected row {:?}", other),
    }

    let ep = yearly_rows(&workspace.output, &config, "EP--");
    assert_eq!(ep.len(), 21);
    assert_eq!(ep[0].avg_cost, 1200.0);
    assert_eq!(ep[1].avg_cost, 800.0);
    assert_eq!(ep[3].avg_cost, 2500.0);
    assert_eq!(ep[2].percent_granted, 0.0);
    assert_eq!(ep[3].percent_granted, 100.0);
    assert_eq!(ep[4].sample_count, 0);

    // No costs at all on the US filing: the gap rule flags it as divisional
    let us = yearly_rows(&workspace.output, &config, "USdv");
    assert_eq!(us.len(), 21);
    assert!(us.iter().all(|row| row.percent_granted == 0.0));
    assert!(us.iter().all(|row| row.age == 4));
}

#[test]
fn test_cost_issues_are_reported_not_fatal() {
    let config = config();
    let mut workspace = two_case_family();
    workspace.costs = MemoryStore::from_records(vec![
        cost("k1", "P2019001EP", date(2019, 3, 10), 100.0),
        cost("k2", "P2019001JP", date(2020, 1, 1), 40.0),
        cost("k3", "P2019001EPX", date(2020, 1, 1), 60.0),
        cost("k4", "P2019001EP", date(2041, 1, 1), 70.0),
    ]);

    let ingest = run_invocation(&config, &mut workspace.stores()).unwrap();
    assert_eq!(ingest.processed, 1);

    let summary = run_invocation(&config, &mut workspace.stores()).unwrap();
    assert_eq!(summary.phase, Phase::Stage(Stage::CostAggregation));
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.issues.len(), 3);
    assert!(summary
        .issues
        .iter()
        .any(|i| matches!(i, RunIssue::UnmatchedCostRecord { record_id, .. } if record_id == "k2")));
    assert!(summary
        .issues
        .iter()
        .any(|i| matches!(i, RunIssue::InvalidReference { reference } if reference == "P2019001EPX")));
    assert!(summary
        .issues
        .iter()
        .any(|i| matches!(i, RunIssue::InvalidBinOffset { offset: 21, .. })));

    let entry = workspace.cache.iterate(&Selector::All).unwrap().next().unwrap();
    let info = entry.family.info.as_ref().unwrap();
    assert_eq!(info.sum, 210.0);
    assert_eq!(entry.family.cases["P2019001EP"].sum, 100.0);
}

#[test]
fn test_rerun_after_drain_starts_over() {
    let config = config();
    let mut workspace = two_case_family();

    StatisticsProcessor::run_to_completion(&config, &mut workspace.stores(), 10).unwrap();
    let first_rows = workspace.output.rows(&config.yearly_dataset).len();

    let summary = run_invocation(&config, &mut workspace.stores()).unwrap();
    assert_eq!(summary.phase, Phase::Ingestion);
    assert_eq!(summary.cache.entries, 1);
    assert_eq!(workspace.output.rows(&config.yearly_dataset).len(), first_rows);
}

#[test]
fn test_skip_ungranted_leaves_nothing_to_do() {
    let config = PipelineConfig {
        skip_ungranted: true,
        ..config()
    };
    let mut workspace = Workspace::new(
        vec![case("P2020005EP", date(2020, 1, 1), None)],
        vec![cost("k1", "P2020005EP", date(2020, 2, 1), 10.0)],
    );

    let summaries =
        StatisticsProcessor::run_to_completion(&config, &mut workspace.stores(), 10).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].skipped, 1);
    assert!(workspace.cache.is_empty());
    assert!(workspace.output.datasets.is_empty());
}

#[test]
fn test_monthly_bins_end_to_end() {
    let config = PipelineConfig {
        bins: BinUnit::Months,
        ..config()
    };
    let mut workspace = Workspace::new(
        vec![case("P2021009EP", date(2021, 1, 15), Some(date(2023, 4, 2)))],
        vec![
            cost("k1", "P2021009EP", date(2021, 1, 30), 500.0),
            cost("k2", "P2021009EP", date(2021, 7, 1), 250.0),
        ],
    );

    StatisticsProcessor::run_to_completion(&config, &mut workspace.stores(), 10).unwrap();

    let rows = yearly_rows(&workspace.output, &config, "EP--");
    assert_eq!(rows.len(), 241);
    assert_eq!(rows[0].avg_cost, 500.0);
    assert_eq!(rows[6].avg_cost, 250.0);
    assert_eq!(rows[26].percent_granted, 0.0);
    assert_eq!(rows[27].percent_granted, 100.0);

    match &workspace.output.rows(&config.grant_time_dataset)[0] {
        OutputRow::GrantTime(row) => assert!((row.avg_cost - 750.0).abs() < 0.01),
        other => panic!("unexpected row {:?}", other),
    }
}

#[test]
fn test_rows_render_as_csv() {
    let config = config();
    let mut workspace = two_case_family();
    StatisticsProcessor::run_to_completion(&config, &mut workspace.stores(), 10).unwrap();

    let mut writer = csv::Writer::from_writer(vec![]);
    for row in yearly_rows(&workspace.output, &config, "EP--") {
        writer.serialize(row).unwrap();
    }
    let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "year,avg_cost,min_cost,max_cost,sample_count,percent_granted,case_type,age,attorney"
    );
    assert_eq!(lines.count(), 21);
}
