use crate::cache::CacheStats;
use crate::migration::{TableVersion, UpgradeOutcome};
use crate::sweep::SweepReport;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Recorded")]
    recorded: String,
    #[tabled(rename = "Target")]
    target: u32,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: usize,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn versions_table(versions: &[TableVersion]) -> String {
    let rows: Vec<VersionRow> = versions
        .iter()
        .map(|v| VersionRow {
            table: v.table.clone(),
            recorded: v.recorded.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            target: v.target,
            state: format!("{:?}", v.state),
        })
        .collect();
    render(&rows)
}

pub fn stats_table(stats: &CacheStats) -> String {
    let rows: Vec<CountRow> = stats
        .tables
        .iter()
        .map(|(table, rows)| CountRow {
            table: table.clone(),
            rows: *rows,
        })
        .collect();
    render(&rows)
}

pub fn sweep_table(report: &SweepReport) -> String {
    let rows: Vec<CountRow> = report
        .deleted
        .iter()
        .map(|(table, rows)| CountRow {
            table: table.clone(),
            rows: *rows,
        })
        .collect();
    render(&rows)
}

pub fn outcomes_table(outcomes: &[(String, UpgradeOutcome)]) -> String {
    let rows: Vec<OutcomeRow> = outcomes
        .iter()
        .map(|(table, outcome)| OutcomeRow {
            table: table.clone(),
            outcome: outcome.to_string(),
        })
        .collect();
    render(&rows)
}
