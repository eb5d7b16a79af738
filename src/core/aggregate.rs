use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::info;

use super::engine::{PathPlan, base_seed, derive_seed};
use super::error::{SimError, SimResult};
use super::types::{AggregateResult, SimulationParameters, SimulationResult, TransitionPolicy};

/// Runs folded into one partial total before merging. Fixed so the merge
/// order, and with it every floating-point sum, is independent of scheduling.
const RUNS_PER_CHUNK: u32 = 256;

/// Per-period mean portfolio and withdrawal across `runs` independent paths,
/// averaging every run regardless of when (or whether) it retired.
pub fn average(params: &SimulationParameters, runs: u32) -> SimResult<AggregateResult> {
    run_aggregate(params, runs, None)
}

/// Per-period mean withdrawal over the runs actually withdrawing in that
/// period, after dropping values above the `outlier_percentile`-th percentile.
/// A skipped transition period does not count as withdrawing.
pub fn filtered_average(
    params: &SimulationParameters,
    runs: u32,
    outlier_percentile: f64,
) -> SimResult<Vec<f64>> {
    let aggregate = run_aggregate(params, runs, Some(outlier_percentile))?;
    Ok(aggregate.filtered_withdrawal.unwrap_or_default())
}

/// Percentage of runs that retired and finished with a positive balance.
pub fn success_rate(params: &SimulationParameters, runs: u32) -> SimResult<f64> {
    Ok(run_aggregate(params, runs, None)?.success_rate)
}

pub fn run_aggregate(
    params: &SimulationParameters,
    runs: u32,
    outlier_percentile: Option<f64>,
) -> SimResult<AggregateResult> {
    if let Some(p) = outlier_percentile {
        if !(0.0..=100.0).contains(&p) {
            return Err(SimError::invalid(
                "outlier_percentile",
                "must be between 0 and 100",
            ));
        }
    }

    let (plan, totals) = run_batch(params, runs, outlier_percentile.is_some())?;
    let BatchTotals {
        portfolio,
        withdrawal,
        withdrawing,
        retired_runs,
        successes,
    } = totals;
    let run_count = runs as f64;

    let mean_portfolio = portfolio.into_iter().map(|v| v / run_count).collect();
    let mean_withdrawal = withdrawal.into_iter().map(|v| v / run_count).collect();

    let filtered_withdrawal = match (outlier_percentile, withdrawing) {
        (Some(p), Some(buckets)) => Some(
            buckets
                .into_iter()
                .map(|mut bucket| mean_without_outliers(&mut bucket, p))
                .collect(),
        ),
        _ => None,
    };

    let success_rate = successes as f64 / run_count * 100.0;

    info!(runs, retired_runs, success_rate, "aggregate complete");

    Ok(AggregateResult {
        runs,
        dates: plan.dates().to_vec(),
        mean_portfolio,
        mean_withdrawal,
        filtered_withdrawal,
        retired_runs,
        success_rate,
    })
}

/// Running totals over a set of runs. Paths are folded in as they finish and
/// never retained.
#[derive(Debug)]
struct BatchTotals {
    portfolio: Vec<f64>,
    withdrawal: Vec<f64>,
    // Per-period withdrawals of runs that withdrew, only when filtering.
    withdrawing: Option<Vec<Vec<f64>>>,
    retired_runs: u32,
    successes: u32,
}

impl BatchTotals {
    fn new(periods: usize, keep_withdrawals: bool) -> Self {
        Self {
            portfolio: vec![0.0; periods],
            withdrawal: vec![0.0; periods],
            withdrawing: keep_withdrawals.then(|| vec![Vec::new(); periods]),
            retired_runs: 0,
            successes: 0,
        }
    }

    fn record(&mut self, result: &SimulationResult, transition: TransitionPolicy) {
        for (idx, point) in result.points.iter().enumerate() {
            self.portfolio[idx] += point.portfolio_value;
            self.withdrawal[idx] += point.withdrawal;

            if let Some(buckets) = self.withdrawing.as_mut() {
                if withdrew_in_period(result, idx, transition) {
                    buckets[idx].push(point.withdrawal);
                }
            }
        }
        if result.retirement_date.is_some() {
            self.retired_runs += 1;
        }
        if result.succeeded() {
            self.successes += 1;
        }
    }

    fn merge(&mut self, other: BatchTotals) {
        for (acc, v) in self.portfolio.iter_mut().zip(other.portfolio) {
            *acc += v;
        }
        for (acc, v) in self.withdrawal.iter_mut().zip(other.withdrawal) {
            *acc += v;
        }
        if let (Some(mine), Some(theirs)) = (self.withdrawing.as_mut(), other.withdrawing) {
            for (acc, bucket) in mine.iter_mut().zip(theirs) {
                acc.extend(bucket);
            }
        }
        self.retired_runs += other.retired_runs;
        self.successes += other.successes;
    }
}

/// Retired in `idx` and not sitting out the period retirement began.
fn withdrew_in_period(
    result: &SimulationResult,
    idx: usize,
    transition: TransitionPolicy,
) -> bool {
    match result.retirement_period {
        Some(retired_at) if retired_at < idx => true,
        Some(retired_at) if retired_at == idx => {
            transition == TransitionPolicy::WithdrawImmediately
        }
        _ => false,
    }
}

fn run_once(plan: &PathPlan, base_seed: u64, run_id: u32) -> SimulationResult {
    let mut rng = StdRng::seed_from_u64(derive_seed(base_seed, run_id));
    plan.run(&mut rng)
}

fn run_batch(
    params: &SimulationParameters,
    runs: u32,
    keep_withdrawals: bool,
) -> SimResult<(PathPlan, BatchTotals)> {
    if runs == 0 {
        return Err(SimError::invalid("runs", "must be > 0"));
    }

    let plan = PathPlan::new(params)?;
    let base = base_seed(params);
    let periods = plan.dates().len();
    let transition = plan.transition();

    let partials = (0..runs.div_ceil(RUNS_PER_CHUNK))
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * RUNS_PER_CHUNK;
            let end = start.saturating_add(RUNS_PER_CHUNK).min(runs);
            let mut totals = BatchTotals::new(periods, keep_withdrawals);
            for run_id in start..end {
                totals.record(&run_once(&plan, base, run_id), transition);
            }
            totals
        })
        .collect::<Vec<_>>();

    let mut totals = BatchTotals::new(periods, keep_withdrawals);
    for partial in partials {
        totals.merge(partial);
    }

    Ok((plan, totals))
}

fn mean_without_outliers(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let cutoff = percentile(values, p);
    let (sum, count) = values
        .iter()
        .filter(|v| **v <= cutoff)
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
