//! The iterate-step engine.
//!
//! One [`Stepper`] performs a single accelerated update per call: the
//! driver loop owns the iterates and the [`History`], evaluates the
//! fixed-point map `G`, and calls [`Stepper::step`] with the raw candidate
//! `x_{k+1} = G(x_k)` and the previous iterate. The stepper applies the
//! caller's correction map, mixes the candidate with the recorded history
//! according to the configured method, and reports a structured snapshot
//! to each of the two caller-supplied analysis callbacks.

use std::collections::VecDeque;
use std::str::FromStr;

use faer::{Col, ColRef, Mat};

use crate::error::{ConfigError, SingularSystem, StepError};
use crate::filters::{angle_filtering, combine_masks, length_filtering};
use crate::history::{FaaHistory, History, PaqrHistory, VanillaHistory};
use crate::linalg::{
    back_substitute, dot, forward_substitute_transpose, lstsq, paqr, ridge_regression,
};

/// Tunable parameters shared by the mixing methods. Each method reads
/// only the fields it needs.
#[derive(Clone, Copy, Debug)]
pub struct MixCfg {
    /// Window size for vanilla and filtered mixing.
    pub m: usize,
    /// Relative deletion tolerance for the pivoted-QR variant.
    pub paqr_tol: f64,
    /// Filtering constant: angle cutoff (a history direction with
    /// |cos| above this against the residual is dropped), and the
    /// denominator of the length bound.
    pub cs: f64,
    /// Condition-number bound driving the length filter.
    pub kappabar: f64,
}

impl Default for MixCfg {
    fn default() -> Self {
        Self {
            m: 3,
            paqr_tol: 1e-10,
            cs: 0.9,
            kappabar: 1e4,
        }
    }
}

impl MixCfg {
    /// Sets the history window size.
    pub fn with_window(mut self, m: usize) -> Self {
        self.m = m;
        self
    }
    /// Sets the pivoted-QR deletion tolerance.
    pub fn with_paqr_tol(mut self, tol: f64) -> Self {
        self.paqr_tol = tol;
        self
    }
    /// Sets both filtering constants for the filtered variant.
    pub fn with_filtering(mut self, cs: f64, kappabar: f64) -> Self {
        self.cs = cs;
        self.kappabar = kappabar;
        self
    }
}

/// The supported mixing variants, by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    /// Plain Anderson mixing over sliding windows.
    Vanilla,
    /// Pivoted-QR history pruning with convex-combination coefficients.
    Paqr,
    /// Filtered Anderson acceleration with length/angle history pruning.
    Faa,
}

impl FromStr for MethodKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vanilla" => Ok(Self::Vanilla),
            "paqr" => Ok(Self::Paqr),
            "faa" => Ok(Self::Faa),
            other => Err(ConfigError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A mixing method with its parameters bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Method {
    /// Plain Anderson mixing with window size `m`.
    Vanilla {
        /// Sliding-window size; histories hold at most `m + 1` entries.
        m: usize,
    },
    /// Pivoted-QR variant with deletion tolerance `tol`.
    Paqr {
        /// Relative tolerance below which a history column is deleted.
        tol: f64,
    },
    /// Filtered variant.
    Faa {
        /// Window size; difference matrices hold at most `m - 1` columns.
        m: usize,
        /// Angle cutoff and length-bound denominator.
        cs: f64,
        /// Condition-number bound for length filtering.
        kappabar: f64,
    },
}

impl Method {
    /// Builds a method from its name and a parameter set. Unknown names
    /// are the only configuration error.
    pub fn parse(name: &str, cfg: MixCfg) -> Result<Self, ConfigError> {
        Ok(match name.parse::<MethodKind>()? {
            MethodKind::Vanilla => Self::Vanilla { m: cfg.m },
            MethodKind::Paqr => Self::Paqr { tol: cfg.paqr_tol },
            MethodKind::Faa => Self::Faa {
                m: cfg.m,
                cs: cfg.cs,
                kappabar: cfg.kappabar,
            },
        })
    }

    /// Fresh historical state matching this method, for one solve run.
    pub fn history(&self) -> History {
        match *self {
            Method::Vanilla { m } => History::Vanilla(VanillaHistory::new(m)),
            Method::Paqr { .. } => History::Paqr(PaqrHistory::new()),
            Method::Faa { m, .. } => History::Faa(FaaHistory::new(m)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Method::Vanilla { .. } => "vanilla",
            Method::Paqr { .. } => "paqr",
            Method::Faa { .. } => "faa",
        }
    }
}

/// Snapshot handed to the mid-analysis callback once per step.
/// Fields are method-specific; sentinel `None`s mark quantities that are
/// undefined before mixing kicks in.
#[derive(Clone, Debug)]
pub enum MidAnalysis {
    /// Vanilla mixing snapshot.
    Vanilla {
        /// Residual `g_k` for this step.
        residual: Col<f64>,
        /// Residual-difference matrix used by the solve (`None` at
        /// iteration 0).
        g_diffs: Option<Mat<f64>>,
        /// Iterate-difference matrix used by the solve.
        x_diffs: Option<Mat<f64>>,
        /// Mixing coefficients.
        gamma: Option<Col<f64>>,
        /// Whether the ridge fallback replaced the least-squares solve.
        ridge_fallback: bool,
    },
    /// Pivoted-QR mixing snapshot.
    Paqr {
        /// Residual `g_k` for this step.
        residual: Col<f64>,
        /// Convex-combination coefficients (sum to 1), aligned to the
        /// retained history, oldest first.
        alpha: Col<f64>,
        /// History columns the pivoting step deleted, increasing order.
        deleted: Vec<usize>,
    },
    /// Filtered mixing snapshot.
    Faa {
        /// Residual `g_k` for this step.
        residual: Col<f64>,
        /// Filtered residual-difference matrix (`None` at iteration 0).
        g_diffs: Option<Mat<f64>>,
        /// Filtered iterate-difference matrix.
        x_diffs: Option<Mat<f64>>,
        /// Mixing coefficients.
        gamma: Option<Col<f64>>,
        /// Combined filter mask, one entry per pre-filter column
        /// (`None` at iterations 0 and 1, where no filtering runs).
        kept: Option<Vec<bool>>,
    },
}

/// Snapshot handed to the live-analysis callback once per step, after
/// the mid-analysis callback.
#[derive(Debug)]
pub struct LiveAnalysis<'a> {
    /// Completed steps, including this one.
    pub iteration: usize,
    /// The iterate after mixing.
    pub x: &'a Col<f64>,
    /// The iterate the step started from.
    pub x_prev: &'a Col<f64>,
    /// Residual history, oldest first. The filtered variant keeps no
    /// residual log, so it reports only the current residual.
    pub residuals: Vec<ColRef<'a, f64>>,
    /// Current history depth (see [`History::depth`]).
    pub depth: usize,
}

/// Per-step engine for one mixing method, closed over the caller's
/// correction map and analysis callbacks.
pub struct Stepper<C, FM, FL> {
    method: Method,
    correction: C,
    mid_analysis: FM,
    live_analysis: FL,
}

impl<C, FM, FL> Stepper<C, FM, FL> {
    /// Builds a stepper. Use [`Method::parse`] first when the method
    /// comes from named configuration.
    pub fn new(method: Method, correction: C, mid_analysis: FM, live_analysis: FL) -> Self {
        Self {
            method,
            correction,
            mid_analysis,
            live_analysis,
        }
    }

    /// The configured method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Fresh historical state for a new solve run.
    pub fn history(&self) -> History {
        self.method.history()
    }

    /// Performs one accelerated update.
    ///
    /// `x_next` arrives as the raw candidate `G(x_k)` and leaves as the
    /// mixed iterate; `x_prev` is `x_k`. The historical state is mutated
    /// in place. Returns the two analysis callback results.
    pub fn step<MA, LA>(
        &mut self,
        hs: &mut History,
        x_next: &mut Col<f64>,
        x_prev: &Col<f64>,
    ) -> Result<(MA, LA), StepError>
    where
        C: FnMut(&mut Col<f64>, &Col<f64>),
        FM: FnMut(&MidAnalysis) -> MA,
        FL: FnMut(&LiveAnalysis<'_>) -> LA,
    {
        debug_assert_eq!(x_next.nrows(), x_prev.nrows());
        (self.correction)(x_next, x_prev);
        let g: Col<f64> = x_next.as_ref() - x_prev.as_ref();

        let mid = match (self.method, &mut *hs) {
            (Method::Vanilla { m }, History::Vanilla(v)) => vanilla_step(v, m, x_next, x_prev, g),
            (Method::Paqr { tol }, History::Paqr(p)) => paqr_step(p, tol, x_next, g)?,
            (Method::Faa { cs, kappabar, .. }, History::Faa(f)) => {
                faa_step(f, cs, kappabar, x_next, x_prev, g)?
            }
            _ => {
                return Err(StepError::HistoryMismatch {
                    expected: self.method.name(),
                    found: hs.variant_name(),
                });
            }
        };

        let ma = (self.mid_analysis)(&mid);
        let live = LiveAnalysis {
            iteration: hs.iteration(),
            x: &*x_next,
            x_prev,
            residuals: residual_views(hs),
            depth: hs.depth(),
        };
        let la = (self.live_analysis)(&live);
        Ok((ma, la))
    }
}

fn residual_views(hs: &History) -> Vec<ColRef<'_, f64>> {
    match hs {
        History::Vanilla(v) => v.residuals.iter().map(|c| c.as_ref()).collect(),
        History::Paqr(p) => p.residual_log.iter().map(|c| c.as_ref()).collect(),
        History::Faa(f) => f.g_prev.iter().map(|c| c.as_ref()).collect(),
    }
}

/// Difference matrix over the newest `take` entries of a window: column
/// `j` is the difference of consecutive entries, oldest difference first.
fn diff_matrix(window: &VecDeque<Col<f64>>, take: usize) -> Mat<f64> {
    let used = window.len().min(take);
    let start = window.len() - used;
    let p = used.saturating_sub(1);
    let n = window.front().map_or(0, Col::nrows);
    let mut m = Mat::zeros(n, p);
    for j in 0..p {
        let newer = &window[start + j + 1];
        let older = &window[start + j];
        for (i, (a, b)) in newer.iter().zip(older.iter()).enumerate() {
            m[(i, j)] = a - b;
        }
    }
    m
}

fn cols_to_mat(cols: &[Col<f64>]) -> Mat<f64> {
    let n = cols.first().map_or(0, |c| c.nrows());
    let staged: Vec<Vec<f64>> = cols.iter().map(|c| c.iter().copied().collect()).collect();
    Mat::from_fn(n, cols.len(), |i, j| staged[j][i])
}

/// `x_next = x_prev + g - (X + G) γ`.
fn apply_update(
    x_next: &mut Col<f64>,
    x_prev: &Col<f64>,
    g: &Col<f64>,
    x_diffs: &Mat<f64>,
    g_diffs: &Mat<f64>,
    gamma: &Col<f64>,
) {
    let combined: Mat<f64> = x_diffs.as_ref() + g_diffs.as_ref();
    let shift: Col<f64> = combined.as_ref() * gamma.as_ref();
    let unmixed: Col<f64> = x_prev.as_ref() + g.as_ref();
    *x_next = unmixed.as_ref() - shift.as_ref();
}

fn vanilla_step(
    hs: &mut VanillaHistory,
    m: usize,
    x_next: &mut Col<f64>,
    x_prev: &Col<f64>,
    g: Col<f64>,
) -> MidAnalysis {
    hs.push_residual(g.clone());
    if hs.iteration == 0 {
        // Seed the solution window with the starting iterate so both
        // windows produce the same number of difference columns.
        hs.push_solution(x_prev.clone());
    }

    let mut g_diffs = None;
    let mut x_diffs = None;
    let mut gamma = None;
    let mut ridge_fallback = false;
    if hs.iteration > 0 {
        // The containers hold m + 1 entries for reporting, but the
        // mixing solve reads only the newest m, i.e. at most m - 1
        // difference columns.
        let gm = diff_matrix(&hs.residuals, m);
        let xm = diff_matrix(&hs.solutions, m);
        let coef = match lstsq(gm.as_ref(), g.as_ref()) {
            Ok(coef) => coef,
            Err(SingularSystem) => {
                ridge_fallback = true;
                ridge_regression(gm.as_ref(), g.as_ref())
            }
        };
        apply_update(x_next, x_prev, &g, &xm, &gm, &coef);
        g_diffs = Some(gm);
        x_diffs = Some(xm);
        gamma = Some(coef);
    }

    hs.push_solution(x_next.clone());
    hs.iteration += 1;
    MidAnalysis::Vanilla {
        residual: g,
        g_diffs,
        x_diffs,
        gamma,
        ridge_fallback,
    }
}

fn paqr_step(
    hs: &mut PaqrHistory,
    tol: f64,
    x_next: &mut Col<f64>,
    g: Col<f64>,
) -> Result<MidAnalysis, StepError> {
    hs.residual_log.push(g.clone());
    hs.g_hist.push(g.clone());
    // The F entry is the raw fixed-point image, recorded before mixing.
    hs.f_hist.push(x_next.clone());

    let (alpha, deleted) = if hs.iteration == 0 {
        (Col::from_fn(1, |_| 1.0), Vec::new())
    } else {
        let gm = cols_to_mat(&hs.g_hist);
        let fact = paqr(gm.as_ref(), tol)?;
        hs.remove_indices(&fact.deleted);

        // Raw coefficients from (RᵀR) α = 1, then normalized so the
        // mixed iterate is a convex combination of the F history. The
        // factor's columns run newest first, so the coefficients are
        // flipped back to the oldest-first history order.
        let rank = fact.r.ncols();
        let ones = vec![1.0; rank];
        let y = forward_substitute_transpose(fact.r.as_ref(), &ones);
        let raw = back_substitute(fact.r.as_ref(), &y);
        let total: f64 = raw.iter().sum();
        let scaled: Vec<f64> = raw.iter().map(|v| v / total).collect();
        let alpha = Col::from_fn(rank, |i| scaled[rank - 1 - i]);

        let fm = cols_to_mat(&hs.f_hist);
        *x_next = fm.as_ref() * alpha.as_ref();
        (alpha, fact.deleted)
    };

    hs.iteration += 1;
    Ok(MidAnalysis::Paqr {
        residual: g,
        alpha,
        deleted,
    })
}

fn faa_step(
    hs: &mut FaaHistory,
    cs: f64,
    kappabar: f64,
    x_next: &mut Col<f64>,
    x_prev: &Col<f64>,
    g: Col<f64>,
) -> Result<MidAnalysis, StepError> {
    let k = hs.iteration;
    let mut g_diffs = None;
    let mut x_diffs = None;
    let mut gamma = None;
    let mut kept = None;

    if k > 0 {
        let (dg, dx) = {
            let g_last = hs
                .g_prev
                .as_ref()
                .expect("previous residual recorded after the first step");
            let x_last = hs
                .x_prev
                .as_ref()
                .expect("previous iterate recorded after the first step");
            let dg: Col<f64> = g.as_ref() - g_last.as_ref();
            let dx: Col<f64> = x_prev.as_ref() - x_last.as_ref();
            (dg, dx)
        };
        hs.prepend(&dg, &dx);

        let coef = if k == 1 {
            // Single difference column: solve the normal equations
            // directly. There is no fallback on this path.
            let c = hs.g_cols.col(0);
            let denom = dot(c, c);
            if denom == 0.0 {
                return Err(StepError::SingularMixingSystem(SingularSystem));
            }
            Col::from_fn(1, |_| dot(c, g.as_ref()) / denom)
        } else {
            let len_mask = length_filtering(&mut hs.g_cols, &mut hs.x_cols, cs, kappabar);
            let ang_mask = angle_filtering(&mut hs.g_cols, &mut hs.x_cols, g.as_ref(), cs);
            kept = Some(combine_masks(&len_mask, &ang_mask));
            // Unlike vanilla mixing there is deliberately no ridge
            // retry here; a singular filtered system is fatal.
            lstsq(hs.g_cols.as_ref(), g.as_ref())?
        };

        apply_update(x_next, x_prev, &g, &hs.x_cols, &hs.g_cols, &coef);
        g_diffs = Some(hs.g_cols.clone());
        x_diffs = Some(hs.x_cols.clone());
        gamma = Some(coef);
    }

    hs.g_prev = Some(g.clone());
    hs.x_prev = Some(x_prev.clone());
    hs.iteration += 1;
    Ok(MidAnalysis::Faa {
        residual: g,
        g_diffs,
        x_diffs,
        gamma,
        kept,
    })
}
