//! Anderson-type acceleration for fixed-point iterations.
//!
//! The driver loop owns the iterates and evaluates the fixed-point map;
//! this crate turns each raw candidate `G(x_k)` into an accelerated
//! update by mixing it with recorded history. Three mixing variants are
//! provided: plain windowed Anderson mixing (`"vanilla"`), a pivoted-QR
//! variant that prunes near-dependent history columns (`"paqr"`), and a
//! filtered variant that drops history columns by length and angle
//! criteria (`"faa"`).
//!
//! ```
//! use andermix::{Method, MidAnalysis, MixCfg, Stepper};
//! use faer::Col;
//!
//! let method = Method::parse("vanilla", MixCfg::default()).unwrap();
//! let mut stepper = Stepper::new(
//!     method,
//!     |_x: &mut Col<f64>, _x_prev: &Col<f64>| {}, // no correction
//!     |mid: &MidAnalysis| mid.clone(),
//!     |live: &andermix::LiveAnalysis<'_>| live.iteration,
//! );
//! let mut history = stepper.history();
//! let mut x = Col::from_fn(2, |_| 1.0);
//! for _ in 0..20 {
//!     let x_prev = x.clone();
//!     let mean = x_prev.iter().sum::<f64>() / 2.0;
//!     x = Col::from_fn(2, |_| mean.cos());
//!     stepper.step(&mut history, &mut x, &x_prev).unwrap();
//! }
//! ```

pub use crate::error::{ConfigError, SingularSystem, StepError};
pub use crate::history::{FaaHistory, History, PaqrHistory, VanillaHistory};
pub use crate::linalg::{Paqr, lstsq, paqr, ridge_regression};
pub use crate::stepper::{LiveAnalysis, Method, MethodKind, MidAnalysis, MixCfg, Stepper};

/// Error types for configuration and stepping.
mod error;
/// Length and angle history filters for the filtered variant.
pub mod filters;
/// Per-method historical state containers.
mod history;
/// Dense least-squares, ridge, and pivoted-QR kernels.
pub mod linalg;
/// The per-step mixing engine.
mod stepper;
