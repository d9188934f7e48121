//! History filtering for the filtered (FAA) mixing variant.
//!
//! Both passes decide per column of the residual-difference matrix
//! (newest column first) and remove the same columns from the
//! iterate-difference matrix, so the two stay aligned. Length filtering
//! runs first over every column; angle filtering only sees the columns
//! that survived it.

use faer::{ColRef, Mat};

use crate::linalg::{dot, keep_columns};

/// Removes history columns that are too long relative to the newest one.
///
/// A column `c_j` is kept iff `‖c_j‖ ≤ (kappabar / cs) · ‖c_0‖` where
/// `c_0` is the newest column. Columns much longer than the current scale
/// dominate the least-squares solve and blow up its condition number.
/// The newest column itself is always kept.
///
/// Returns the keep mask aligned to the pre-filter column order and
/// removes the dropped columns from both matrices.
pub fn length_filtering(
    g_cols: &mut Mat<f64>,
    x_cols: &mut Mat<f64>,
    cs: f64,
    kappabar: f64,
) -> Vec<bool> {
    let p = g_cols.ncols();
    if p == 0 {
        return Vec::new();
    }
    let newest = g_cols.col(0).norm_l2();
    let bound = (kappabar / cs) * newest;
    let mut keep = vec![true; p];
    for (j, flag) in keep.iter_mut().enumerate().skip(1) {
        *flag = g_cols.col(j).norm_l2() <= bound;
    }
    *g_cols = keep_columns(g_cols, &keep);
    *x_cols = keep_columns(x_cols, &keep);
    keep
}

/// Removes history columns nearly parallel to the current residual.
///
/// Applied to the columns that survived length filtering. A column `c_j`
/// is dropped when `|⟨c_j, g⟩| / (‖c_j‖·‖g‖) > cs`: a direction that
/// close to the residual adds no independent information and makes the
/// solve ill-conditioned. Degenerate (zero-norm) columns are dropped too.
///
/// If the pass would drop every remaining column, the newest is retained
/// so the step never falls back to an undefined mixing system.
///
/// Returns the keep mask over the post-length-filter columns and removes
/// the dropped columns from both matrices.
pub fn angle_filtering(
    g_cols: &mut Mat<f64>,
    x_cols: &mut Mat<f64>,
    residual: ColRef<'_, f64>,
    cs: f64,
) -> Vec<bool> {
    let p = g_cols.ncols();
    if p == 0 {
        return Vec::new();
    }
    let g_norm = residual.norm_l2();
    let mut keep = vec![false; p];
    for (j, flag) in keep.iter_mut().enumerate() {
        let c_norm = g_cols.col(j).norm_l2();
        let denom = c_norm * g_norm;
        if denom == 0.0 {
            continue;
        }
        let cosine = dot(g_cols.col(j), residual).abs() / denom;
        *flag = cosine <= cs;
    }
    if keep.iter().all(|&k| !k) {
        // Never empty the history entirely: keep the newest column.
        keep[0] = true;
    }
    *g_cols = keep_columns(g_cols, &keep);
    *x_cols = keep_columns(x_cols, &keep);
    keep
}

/// Merges the two pass masks into one entry per original column,
/// `true` meaning the column survived both passes.
pub fn combine_masks(length: &[bool], angle: &[bool]) -> Vec<bool> {
    debug_assert_eq!(length.iter().filter(|&&k| k).count(), angle.len());
    let mut angle_it = angle.iter();
    length
        .iter()
        .map(|&kept| kept && *angle_it.next().unwrap_or(&false))
        .collect()
}
