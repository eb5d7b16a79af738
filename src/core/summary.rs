use chrono::NaiveDate;

use super::types::{AggregateResult, AggregateSummary, Milestone, RunSummary, SimulationResult};

pub const DEFAULT_MILESTONES: [f64; 9] = [
    10_000.0,
    50_000.0,
    100_000.0,
    250_000.0,
    500_000.0,
    1_000_000.0,
    2_500_000.0,
    5_000_000.0,
    10_000_000.0,
];

pub fn years_between(start: NaiveDate, end: NaiveDate) -> f64 {
    (end - start).num_days() as f64 / 365.25
}

/// First period at which `values` reaches each threshold. Thresholds never
/// reached are omitted.
pub fn milestones(dates: &[NaiveDate], values: &[f64], thresholds: &[f64]) -> Vec<Milestone> {
    thresholds
        .iter()
        .filter_map(|&threshold| {
            values
                .iter()
                .position(|v| *v >= threshold)
                .and_then(|period| {
                    dates.get(period).map(|&date| Milestone {
                        threshold,
                        period,
                        date,
                    })
                })
        })
        .collect()
}

pub fn summarize_run(
    result: &SimulationResult,
    start_date: NaiveDate,
    thresholds: &[f64],
) -> RunSummary {
    let dates = result.points.iter().map(|p| p.date).collect::<Vec<_>>();
    let values = result
        .points
        .iter()
        .map(|p| p.portfolio_value)
        .collect::<Vec<_>>();

    RunSummary {
        retirement_date: result.retirement_date,
        years_to_retirement: result
            .retirement_date
            .map(|date| years_between(start_date, date)),
        final_value: result.final_value(),
        total_withdrawn: result.total_withdrawn,
        milestones: milestones(&dates, &values, thresholds),
    }
}

pub fn summarize_aggregate(aggregate: &AggregateResult, thresholds: &[f64]) -> AggregateSummary {
    AggregateSummary {
        runs: aggregate.runs,
        success_rate: aggregate.success_rate,
        final_mean_value: aggregate.mean_portfolio.last().copied().unwrap_or(0.0),
        total_mean_withdrawn: aggregate.mean_withdrawal.iter().sum(),
        milestones: milestones(&aggregate.dates, &aggregate.mean_portfolio, thresholds),
    }
}

/// One-line human readable outcome of a single run.
pub fn describe_run(summary: &RunSummary) -> String {
    match (summary.retirement_date, summary.years_to_retirement) {
        (Some(date), Some(years)) => format!(
            "Started withdrawing on {} (after about {years:.2} years). \
             Final portfolio value: £{:.2}. Total withdrawn: £{:.2}.",
            date.format("%Y-%m-%d"),
            summary.final_value,
            summary.total_withdrawn,
        ),
        _ => format!(
            "The portfolio never reached the threshold to sustain the target living cost. \
             Final portfolio value: £{:.2}. Total withdrawn: £0.00.",
            summary.final_value,
        ),
    }
}
