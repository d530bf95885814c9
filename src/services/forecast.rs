//! ARIMA(5,1,0) forecast over daily closing prices.
//!
//! The model differences the series once and fits an AR(5) without a
//! constant by conditional least squares. Not exposed over HTTP.

use log::{debug, info};
use thiserror::Error;

use crate::models::Period;
use crate::services::market_data::{MarketDataClient, MarketDataError};

pub const DEFAULT_HORIZON: usize = 5;

const AR_ORDER: usize = 5;
const DIFF_ORDER: usize = 1;
// Relative ridge term keeping collinear lag matrices solvable.
const RIDGE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("need at least {needed} prices to fit the model, got {got}")]
    InsufficientHistory { needed: usize, got: usize },
    #[error("lag matrix is singular")]
    SingularSystem,
    #[error("market data error: {0}")]
    MarketData(#[from] MarketDataError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaModel {
    pub p: usize,
    pub d: usize,
}

impl Default for ArimaModel {
    fn default() -> Self {
        Self {
            p: AR_ORDER,
            d: DIFF_ORDER,
        }
    }
}

impl ArimaModel {
    /// Smallest series the fit accepts: enough differenced points for
    /// more equations than coefficients.
    pub fn min_observations(&self) -> usize {
        2 * self.p + 1 + self.d
    }

    pub fn fit(&self, series: &[f64]) -> Result<FittedArima, ForecastError> {
        let needed = self.min_observations();
        if series.len() < needed {
            return Err(ForecastError::InsufficientHistory {
                needed,
                got: series.len(),
            });
        }

        let mut levels = Vec::with_capacity(self.d);
        let mut work = series.to_vec();
        for _ in 0..self.d {
            levels.push(*work.last().unwrap_or(&0.0));
            work = difference(&work);
        }

        let coefficients = fit_ar(&work, self.p)?;
        debug!("Fitted AR({}) coefficients: {:?}", self.p, coefficients);

        Ok(FittedArima {
            coefficients,
            history: work,
            levels,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FittedArima {
    coefficients: Vec<f64>,
    // Differenced series used for the AR recursion.
    history: Vec<f64>,
    // Last value at each differencing depth, outermost first.
    levels: Vec<f64>,
}

impl FittedArima {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        let p = self.coefficients.len();
        let mut diffs = self.history.clone();
        let mut levels = self.levels.clone();
        let mut out = Vec::with_capacity(steps);

        for _ in 0..steps {
            let n = diffs.len();
            let next: f64 = (0..p).map(|i| self.coefficients[i] * diffs[n - 1 - i]).sum();
            diffs.push(next);

            // Integrate back up through each differencing depth.
            let mut value = next;
            for level in levels.iter_mut().rev() {
                *level += value;
                value = *level;
            }
            out.push(value);
        }
        out
    }
}

/// Fetches a year of daily closes (bypassing the price cache) and forecasts
/// `days` closing prices ahead.
pub async fn predict_arima(
    client: &dyn MarketDataClient,
    ticker: &str,
    days: usize,
) -> Result<Vec<f64>, ForecastError> {
    let series = client.history(ticker, Period::OneYear).await?;
    let closes: Vec<f64> = series.iter().map(|bar| bar.close).collect();
    info!("Fitting ARIMA(5,1,0) for {} on {} closes", ticker, closes.len());

    let fitted = ArimaModel::default().fit(&closes)?;
    Ok(fitted.forecast(days))
}

fn difference(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Conditional least squares for `x_t = sum(phi_i * x_{t-i})`.
fn fit_ar(x: &[f64], p: usize) -> Result<Vec<f64>, ForecastError> {
    if x.iter().all(|v| *v == 0.0) {
        return Ok(vec![0.0; p]);
    }

    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for t in p..x.len() {
        for i in 0..p {
            let lag_i = x[t - 1 - i];
            xty[i] += lag_i * x[t];
            for j in 0..p {
                xtx[i][j] += lag_i * x[t - 1 - j];
            }
        }
    }

    let trace: f64 = (0..p).map(|i| xtx[i][i]).sum();
    let ridge = RIDGE * trace / p as f64;
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += ridge;
    }

    solve(xtx, xty)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ForecastError> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()));

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() <= f64::EPSILON * scale || !a[pivot][col].is_finite() {
            return Err(ForecastError::SingularSystem);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_b;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
