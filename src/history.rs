//! Per-method historical state for a single solve run.
//!
//! One instance lives for the duration of one driver loop and is mutated
//! in place by every step. The three variants keep deliberately different
//! containers: sliding windows for vanilla mixing, pivot-pruned sequences
//! for the pivoted-QR variant, and difference matrices for the filtered
//! variant.

use std::collections::VecDeque;

use faer::{Col, Mat};

/// Sliding windows for plain Anderson mixing.
///
/// Both windows are bounded to `m + 1` entries, oldest evicted first.
/// The solution window is seeded with the starting iterate on the first
/// step so both windows are the same length when difference matrices are
/// built.
#[derive(Debug, Clone)]
pub struct VanillaHistory {
    pub(crate) residuals: VecDeque<Col<f64>>,
    pub(crate) solutions: VecDeque<Col<f64>>,
    pub(crate) iteration: usize,
    bound: usize,
}

impl VanillaHistory {
    pub(crate) fn new(m: usize) -> Self {
        let bound = m + 1;
        Self {
            residuals: VecDeque::with_capacity(bound),
            solutions: VecDeque::with_capacity(bound),
            iteration: 0,
            bound,
        }
    }

    pub(crate) fn push_residual(&mut self, g: Col<f64>) {
        if self.residuals.len() == self.bound {
            self.residuals.pop_front();
        }
        self.residuals.push_back(g);
    }

    pub(crate) fn push_solution(&mut self, x: Col<f64>) {
        if self.solutions.len() == self.bound {
            self.solutions.pop_front();
        }
        self.solutions.push_back(x);
    }

    /// Residual window, oldest first.
    pub fn residuals(&self) -> &VecDeque<Col<f64>> {
        &self.residuals
    }

    /// Solution window, oldest first.
    pub fn solutions(&self) -> &VecDeque<Col<f64>> {
        &self.solutions
    }
}

/// History for the pivoted-QR (DIIS-like) variant.
///
/// `g_hist` and `f_hist` grow without a sliding bound; entries are removed
/// jointly at the indices the pivoting step deletes, never FIFO-evicted.
/// The residual log is append-only and feeds live analysis.
#[derive(Debug, Clone, Default)]
pub struct PaqrHistory {
    pub(crate) residual_log: Vec<Col<f64>>,
    pub(crate) g_hist: Vec<Col<f64>>,
    pub(crate) f_hist: Vec<Col<f64>>,
    pub(crate) iteration: usize,
}

impl PaqrHistory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Removes entries at `indices` (strictly increasing) from both
    /// pruned sequences, keeping them the same length.
    pub(crate) fn remove_indices(&mut self, indices: &[usize]) {
        for &idx in indices.iter().rev() {
            self.g_hist.remove(idx);
            self.f_hist.remove(idx);
        }
        debug_assert_eq!(self.g_hist.len(), self.f_hist.len());
    }

    /// Every residual seen so far, oldest first.
    pub fn residual_log(&self) -> &[Col<f64>] {
        &self.residual_log
    }
}

/// History for the filtered (FAA) variant: difference matrices with the
/// newest column first, plus the previous residual and previous accepted
/// iterate needed to form the next difference columns.
#[derive(Debug, Clone)]
pub struct FaaHistory {
    pub(crate) g_cols: Mat<f64>,
    pub(crate) x_cols: Mat<f64>,
    pub(crate) g_prev: Option<Col<f64>>,
    pub(crate) x_prev: Option<Col<f64>>,
    pub(crate) iteration: usize,
    cap: usize,
}

impl FaaHistory {
    pub(crate) fn new(m: usize) -> Self {
        Self {
            g_cols: Mat::zeros(0, 0),
            x_cols: Mat::zeros(0, 0),
            g_prev: None,
            x_prev: None,
            iteration: 0,
            cap: m.saturating_sub(1),
        }
    }

    /// Prepends one difference column to each matrix, then trims the
    /// oldest (rightmost) columns so neither exceeds `m - 1`.
    pub(crate) fn prepend(&mut self, dg: &Col<f64>, dx: &Col<f64>) {
        self.g_cols = crate::linalg::with_front_column(&self.g_cols, dg, self.cap);
        self.x_cols = crate::linalg::with_front_column(&self.x_cols, dx, self.cap);
        debug_assert_eq!(self.g_cols.ncols(), self.x_cols.ncols());
    }

    /// Residual-difference matrix, newest column first.
    pub fn g_cols(&self) -> &Mat<f64> {
        &self.g_cols
    }

    /// Iterate-difference matrix, newest column first.
    pub fn x_cols(&self) -> &Mat<f64> {
        &self.x_cols
    }
}

/// Historical state for one solve run, tagged by method variant.
#[derive(Debug, Clone)]
pub enum History {
    /// State for [`crate::Method::Vanilla`].
    Vanilla(VanillaHistory),
    /// State for [`crate::Method::Paqr`].
    Paqr(PaqrHistory),
    /// State for [`crate::Method::Faa`].
    Faa(FaaHistory),
}

impl History {
    /// Number of completed steps.
    pub fn iteration(&self) -> usize {
        match self {
            History::Vanilla(hs) => hs.iteration,
            History::Paqr(hs) => hs.iteration,
            History::Faa(hs) => hs.iteration,
        }
    }

    /// Current history depth: window entries (vanilla), retained
    /// G-vectors (paqr), or difference columns (faa).
    pub fn depth(&self) -> usize {
        match self {
            History::Vanilla(hs) => hs.residuals.len(),
            History::Paqr(hs) => hs.g_hist.len(),
            History::Faa(hs) => hs.g_cols.ncols(),
        }
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            History::Vanilla(_) => "vanilla",
            History::Paqr(_) => "paqr",
            History::Faa(_) => "faa",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(vals: &[f64]) -> Col<f64> {
        Col::from_fn(vals.len(), |i| vals[i])
    }

    #[test]
    fn vanilla_windows_evict_fifo() {
        let mut hs = VanillaHistory::new(2);
        for k in 0..5 {
            hs.push_residual(col(&[k as f64]));
        }
        assert_eq!(hs.residuals.len(), 3);
        let seen: Vec<f64> = hs.residuals.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(seen, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn paqr_joint_removal_keeps_lengths_equal() {
        let mut hs = PaqrHistory::new();
        for k in 0..4 {
            hs.g_hist.push(col(&[k as f64]));
            hs.f_hist.push(col(&[10.0 + k as f64]));
        }
        hs.remove_indices(&[1, 3]);
        assert_eq!(hs.g_hist.len(), 2);
        assert_eq!(hs.f_hist.len(), 2);
        let g: Vec<f64> = hs.g_hist.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(g, vec![0.0, 2.0]);
    }

    #[test]
    fn faa_prepend_caps_and_orders_newest_first() {
        let mut hs = FaaHistory::new(3); // cap = 2 columns
        for k in 0..4 {
            let c = col(&[k as f64, 0.0]);
            hs.prepend(&c, &c);
        }
        assert_eq!(hs.g_cols.ncols(), 2);
        assert_eq!(hs.x_cols.ncols(), 2);
        // Newest (3.0) first, oldest trimmed.
        assert_eq!(hs.g_cols[(0, 0)], 3.0);
        assert_eq!(hs.g_cols[(0, 1)], 2.0);
    }

}
