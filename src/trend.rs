//! Scroll trend fitting
//!
//! Fits an ordinary least-squares model of scroll depth against elapsed time
//! and reports the coefficient of determination as the fit quality. A reader
//! working linearly through the content produces a depth that grows steadily
//! with time, so a high quality is a proxy for sustained reading.
//!
//! The design matrix has two columns: elapsed seconds since the session's first
//! sample and a constant bias of 1.0. The bias column is fixed; it does not
//! follow the `is_visible` flag.

use crate::types::{Session, TrendFit};

/// Number of regressors in the design matrix (elapsed time, bias)
pub const DESIGN_WIDTH: usize = 2;

/// Value of the bias regressor for every sample
pub const BIAS: f64 = 1.0;

/// One observation for the fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPoint {
    /// Seconds since the session's first sample
    pub elapsed_seconds: f64,
    /// Bias regressor
    pub bias: f64,
    /// Observed scroll depth
    pub scroll_depth: f64,
}

impl TrendPoint {
    pub fn new(elapsed_seconds: f64, scroll_depth: f64) -> Self {
        Self {
            elapsed_seconds,
            bias: BIAS,
            scroll_depth,
        }
    }

    fn regressors(&self) -> [f64; DESIGN_WIDTH] {
        [self.elapsed_seconds, self.bias]
    }
}

/// Least-squares trend fitter
pub struct TrendFitter;

impl TrendFitter {
    /// Fit a session's scroll depth against elapsed time
    pub fn fit(session: &Session) -> TrendFit {
        Self::fit_points(&Self::points(session))
    }

    /// Build the observations for a session; the first sample has elapsed time 0
    pub fn points(session: &Session) -> Vec<TrendPoint> {
        let started_at = session.started_at();
        session
            .events()
            .iter()
            .map(|event| {
                let elapsed = event.timestamp - started_at;
                // Nanoseconds overflow only past ~292 years
                let seconds = match elapsed.num_nanoseconds() {
                    Some(ns) => ns as f64 / 1e9,
                    None => elapsed.num_milliseconds() as f64 / 1e3,
                };
                TrendPoint::new(seconds, event.scroll_depth)
            })
            .collect()
    }

    /// Fit a set of observations.
    ///
    /// Quality is `1 - SSR / SST`, clamped to [0, 1]. It is undefined when
    /// there are no observations, when scroll depth has no variance, or when
    /// the normal equations are singular (every sample at the same instant).
    pub fn fit_points(points: &[TrendPoint]) -> TrendFit {
        let observations = points.len();
        if observations == 0 {
            return TrendFit::undefined(0);
        }

        let n = observations as f64;
        let mean = points.iter().map(|p| p.scroll_depth).sum::<f64>() / n;
        let total_sum_squares: f64 = points
            .iter()
            .map(|p| (p.scroll_depth - mean).powi(2))
            .sum();
        let magnitude: f64 = points.iter().map(|p| p.scroll_depth.powi(2)).sum();

        // Rounding in `mean` leaves a tiny positive SST for constant series
        if total_sum_squares <= f64::EPSILON * magnitude {
            return TrendFit::undefined(observations);
        }

        let (xtx, xty) = normal_equations(points);
        let Some(coefficients) = solve(xtx, xty) else {
            return TrendFit::undefined(observations);
        };

        let residual_sum_squares: f64 = points
            .iter()
            .map(|p| (p.scroll_depth - predict(&coefficients, p)).powi(2))
            .sum();

        let quality = 1.0 - residual_sum_squares / total_sum_squares;
        if !quality.is_finite() {
            return TrendFit::undefined(observations);
        }

        TrendFit {
            quality: Some(quality.clamp(0.0, 1.0)),
            coefficients: Some(coefficients),
            observations,
        }
    }
}

fn predict(coefficients: &[f64; DESIGN_WIDTH], point: &TrendPoint) -> f64 {
    coefficients
        .iter()
        .zip(point.regressors())
        .map(|(beta, x)| beta * x)
        .sum()
}

/// Accumulate XᵀX and Xᵀy
fn normal_equations(
    points: &[TrendPoint],
) -> ([[f64; DESIGN_WIDTH]; DESIGN_WIDTH], [f64; DESIGN_WIDTH]) {
    let mut xtx = [[0.0; DESIGN_WIDTH]; DESIGN_WIDTH];
    let mut xty = [0.0; DESIGN_WIDTH];

    for point in points {
        let x = point.regressors();
        for i in 0..DESIGN_WIDTH {
            for j in 0..DESIGN_WIDTH {
                xtx[i][j] += x[i] * x[j];
            }
            xty[i] += x[i] * point.scroll_depth;
        }
    }

    (xtx, xty)
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when `a` is singular relative to its largest entry.
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    let largest = a.iter().flatten().fold(0.0_f64, |m, v| m.max(v.abs()));
    let tolerance = f64::EPSILON * N as f64 * largest;

    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= tolerance {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
