//! Dense linear-system utilities backing the mixing solves.
//!
//! The difference matrices built from short iterate windows are tall and
//! skinny (a handful of columns), so the factorizations here are plain
//! Gram-Schmidt loops; faer's `FullPivLu` handles the damped normal
//! equations in the ridge fallback.

use faer::prelude::Solve;
use faer::{Col, ColRef, Mat, MatRef};

use crate::error::{SingularSystem, StepError};

/// Relative breakdown tolerance for the thin-QR least-squares solve.
/// An orthogonalized column shorter than this (relative to the matrix
/// scale) means the system is numerically rank-deficient.
const LSTSQ_BREAKDOWN_RTOL: f64 = 1e-12;

/// Damping factor for the ridge-regression fallback, scaled by the
/// largest diagonal entry of the normal matrix.
const RIDGE_LAMBDA: f64 = 1e-10;

pub(crate) fn dot(a: ColRef<'_, f64>, b: ColRef<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// Least-squares solve of `A x ≈ b` by thin QR (modified Gram-Schmidt).
///
/// Reports [`SingularSystem`] instead of returning a garbage solution when
/// a diagonal of `R` falls below tolerance. Callers decide whether a
/// regularized retry is appropriate for their method.
pub fn lstsq(a: MatRef<'_, f64>, b: ColRef<'_, f64>) -> Result<Col<f64>, SingularSystem> {
    let n = a.nrows();
    let p = a.ncols();
    debug_assert_eq!(n, b.nrows());
    if p == 0 || p > n {
        return Err(SingularSystem);
    }

    let scale = libm::fmax(a.norm_l2(), 1.0);
    let mut q = a.to_owned();
    let mut r = Mat::<f64>::zeros(p, p);
    for j in 0..p {
        for i in 0..j {
            let mut proj = 0.0;
            for row in 0..n {
                proj += q[(row, i)] * q[(row, j)];
            }
            r[(i, j)] = proj;
            for row in 0..n {
                let qi = q[(row, i)];
                q[(row, j)] -= proj * qi;
            }
        }
        let mut nrm2 = 0.0;
        for row in 0..n {
            nrm2 += q[(row, j)] * q[(row, j)];
        }
        let nrm = nrm2.sqrt();
        if nrm <= LSTSQ_BREAKDOWN_RTOL * scale {
            return Err(SingularSystem);
        }
        r[(j, j)] = nrm;
        for row in 0..n {
            q[(row, j)] /= nrm;
        }
    }

    // x = R⁻¹ Qᵀ b
    let mut qtb = vec![0.0; p];
    for (j, out) in qtb.iter_mut().enumerate() {
        let mut s = 0.0;
        for (row, &bv) in b.iter().enumerate() {
            s += q[(row, j)] * bv;
        }
        *out = s;
    }
    Ok(back_substitute(r.as_ref(), &qtb))
}

/// Regularized least-squares solve of `A x ≈ b` via the damped normal
/// equations `(AᵀA + λI) x = Aᵀ b`.
///
/// Total: returns a finite solution for any `A`, including rank-deficient
/// ones, because the damping makes the normal matrix positive definite.
pub fn ridge_regression(a: MatRef<'_, f64>, b: ColRef<'_, f64>) -> Col<f64> {
    let p = a.ncols();
    let mut damped: Mat<f64> = a.transpose() * a;
    let largest = (0..p).map(|i| damped[(i, i)]).fold(0.0, libm::fmax);
    let lambda = RIDGE_LAMBDA * libm::fmax(largest, 1.0);
    for i in 0..p {
        damped[(i, i)] += lambda;
    }
    let atb: Col<f64> = a.transpose() * b;
    damped.full_piv_lu().solve(&atb)
}

/// A QR factorization with below-tolerance columns deleted.
#[derive(Debug, Clone)]
pub struct Paqr {
    /// Orthonormal basis of the retained columns (n × r), newest
    /// retained column first.
    pub q: Mat<f64>,
    /// Upper-triangular, invertible by construction (r × r), columns in
    /// the same newest-first order as `q`.
    pub r: Mat<f64>,
    /// Indices of deleted columns, strictly increasing.
    pub deleted: Vec<usize>,
}

/// Rank-revealing QR with column deletion.
///
/// Columns are processed newest (rightmost) first, so when a direction
/// is duplicated it is the stale column that loses its spot: a column
/// whose orthogonal remainder against the basis of newer columns is
/// below `tol` relative to its own norm is deleted. The newest column is
/// only ever deleted when it is identically zero. Deleting every column
/// is a fatal [`StepError::RankCollapse`].
pub fn paqr(g: MatRef<'_, f64>, tol: f64) -> Result<Paqr, StepError> {
    let n = g.nrows();
    let p = g.ncols();
    let mut q_cols: Vec<Vec<f64>> = Vec::new();
    let mut r_cols: Vec<Vec<f64>> = Vec::new();
    let mut deleted = Vec::new();

    for j in (0..p).rev() {
        let mut v: Vec<f64> = g.col(j).iter().copied().collect();
        let orig = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        let mut coeffs = Vec::with_capacity(q_cols.len() + 1);
        for qc in &q_cols {
            let mut c = 0.0;
            for row in 0..n {
                c += qc[row] * v[row];
            }
            for row in 0..n {
                v[row] -= c * qc[row];
            }
            coeffs.push(c);
        }
        let rem = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if rem <= tol * orig {
            deleted.push(j);
        } else {
            for entry in &mut v {
                *entry /= rem;
            }
            coeffs.push(rem);
            q_cols.push(v);
            r_cols.push(coeffs);
        }
    }
    deleted.reverse();

    let rank = q_cols.len();
    if rank == 0 {
        return Err(StepError::RankCollapse { ncols: p, tol });
    }
    let q = Mat::from_fn(n, rank, |i, j| q_cols[j][i]);
    let r = Mat::from_fn(rank, rank, |i, j| if i <= j { r_cols[j][i] } else { 0.0 });
    Ok(Paqr { q, r, deleted })
}

/// Returns `m` with `col` prepended as the new first column, trimmed on
/// the right to at most `cap` columns (`cap` is treated as at least 1).
pub(crate) fn with_front_column(m: &Mat<f64>, col: &Col<f64>, cap: usize) -> Mat<f64> {
    let n = col.nrows();
    let front: Vec<f64> = col.iter().copied().collect();
    let ncols = (m.ncols() + 1).min(cap.max(1));
    Mat::from_fn(n, ncols, |i, j| if j == 0 { front[i] } else { m[(i, j - 1)] })
}

/// Returns `m` restricted to the columns where `keep` is true, order
/// preserved.
pub(crate) fn keep_columns(m: &Mat<f64>, keep: &[bool]) -> Mat<f64> {
    debug_assert_eq!(m.ncols(), keep.len());
    let kept: Vec<usize> = (0..m.ncols()).filter(|&j| keep[j]).collect();
    Mat::from_fn(m.nrows(), kept.len(), |i, j| m[(i, kept[j])])
}

/// Solves `R x = y` for upper-triangular `R` with nonzero diagonal.
pub(crate) fn back_substitute(r: MatRef<'_, f64>, y: &[f64]) -> Col<f64> {
    let p = r.ncols();
    let mut x = vec![0.0; p];
    for j in (0..p).rev() {
        let mut s = y[j];
        for i in (j + 1)..p {
            s -= r[(j, i)] * x[i];
        }
        x[j] = s / r[(j, j)];
    }
    Col::from_fn(p, |i| x[i])
}

/// Solves `Rᵀ y = rhs` for upper-triangular `R` (forward substitution
/// through the transpose, reading `R`'s storage directly).
pub(crate) fn forward_substitute_transpose(r: MatRef<'_, f64>, rhs: &[f64]) -> Vec<f64> {
    let p = r.ncols();
    let mut y = vec![0.0; p];
    for j in 0..p {
        let mut s = rhs[j];
        for i in 0..j {
            s -= r[(i, j)] * y[i];
        }
        y[j] = s / r[(j, j)];
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(rows: usize, cols: usize, data: &[f64]) -> Mat<f64> {
        Mat::from_fn(rows, cols, |i, j| data[i * cols + j])
    }

    #[test]
    fn lstsq_recovers_exact_solution() {
        // Overdetermined but consistent: x = [1, 2].
        let a = mat(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = Col::from_fn(3, |i| [1.0, 2.0, 3.0][i]);
        let x: Vec<f64> = lstsq(a.as_ref(), b.as_ref()).unwrap().iter().copied().collect();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn lstsq_rejects_dependent_columns() {
        // Second column is 2x the first.
        let a = mat(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let b = Col::from_fn(3, |_| 1.0);
        assert_eq!(lstsq(a.as_ref(), b.as_ref()).unwrap_err(), SingularSystem);
    }

    #[test]
    fn ridge_is_finite_for_singular_systems() {
        let a = mat(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let b = Col::from_fn(3, |i| i as f64);
        let x = ridge_regression(a.as_ref(), b.as_ref());
        assert!(x.iter().all(|v| v.is_finite()));
        // The damped normal equations must hold: (AᵀA + λI) x = Aᵀ b.
        // With tiny λ the residual Aᵀ(Ax - b) should be tiny too.
        let ax: Col<f64> = a.as_ref() * x.as_ref();
        let resid: Col<f64> = a.transpose() * (ax.as_ref() - b.as_ref());
        assert!(resid.norm_l2() < 1e-6, "normal residual {}", resid.norm_l2());
    }

    #[test]
    fn ridge_is_finite_for_zero_matrix() {
        let a = Mat::<f64>::zeros(3, 2);
        let b = Col::from_fn(3, |_| 1.0);
        let x = ridge_regression(a.as_ref(), b.as_ref());
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn paqr_deletes_the_stale_duplicate_column() {
        // Column 2 (newest) duplicates column 0 up to scale; columns 1
        // and 2 are independent. The stale copy goes, not the fresh one.
        let a = mat(
            3,
            3,
            &[
                1.0, 0.0, 2.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0,
            ],
        );
        let f = paqr(a.as_ref(), 1e-10).unwrap();
        assert_eq!(f.deleted, vec![0]);
        assert_eq!(f.r.ncols(), 2);
        // R invertible: nonzero diagonal.
        for i in 0..2 {
            assert!(f.r[(i, i)].abs() > 1e-12);
        }
    }

    #[test]
    fn paqr_keeps_the_newest_column_when_history_is_saturated() {
        // The newest column lies in the span of the two older ones; the
        // deletion must fall on an older column so fresh information is
        // never discarded by its own step.
        let a = mat(
            2,
            3,
            &[
                1.0, 0.0, 1.0, //
                0.0, 1.0, 1.0,
            ],
        );
        let f = paqr(a.as_ref(), 1e-10).unwrap();
        assert_eq!(f.deleted, vec![0]);
        assert!(!f.deleted.contains(&2));
    }

    #[test]
    fn paqr_rank_collapse_is_fatal() {
        let a = Mat::<f64>::zeros(3, 2);
        let err = paqr(a.as_ref(), 1e-10).unwrap_err();
        assert!(matches!(err, StepError::RankCollapse { ncols: 2, .. }));
    }

    #[test]
    fn paqr_reconstructs_retained_columns() {
        let a = mat(3, 2, &[2.0, 1.0, 0.0, 3.0, 1.0, 0.0]);
        let f = paqr(a.as_ref(), 1e-12).unwrap();
        assert!(f.deleted.is_empty());
        // Factor columns run newest first, mirroring the input.
        let qr: Mat<f64> = f.q.as_ref() * f.r.as_ref();
        let reversed = Mat::from_fn(3, 2, |i, j| a[(i, 1 - j)]);
        assert!((qr.as_ref() - reversed.as_ref()).norm_l2() < 1e-12);
    }

    #[test]
    fn triangular_solves_round_trip() {
        let r = mat(3, 3, &[2.0, 1.0, 0.5, 0.0, 3.0, 1.0, 0.0, 0.0, 4.0]);
        let x = back_substitute(r.as_ref(), &[1.0, 2.0, 3.0]);
        // Check R x = y.
        let rx: Col<f64> = r.as_ref() * x.as_ref();
        for (got, want) in rx.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12);
        }
        let y = forward_substitute_transpose(r.as_ref(), &[1.0, 2.0, 3.0]);
        // Check Rᵀ y = rhs.
        for j in 0..3 {
            let mut s = 0.0;
            for i in 0..3 {
                s += r[(i, j)] * y[i];
            }
            assert!((s - [1.0, 2.0, 3.0][j]).abs() < 1e-12);
        }
    }
}
