//! Feature statistics ("style descriptors").
//!
//! A `Statistic` names one of five transforms (raw, mean, gramian,
//! variance, covariance) plus its activation shift. `describe` applies it to
//! an activation; gradients live in `diff::stats_grad`.

mod kind;
mod transform;

pub use kind::{Statistic, StatisticKind, StatsError};
pub use transform::{
    covariance_matrix, describe, gramian_matrix, mean_vector, variance_vector, Descriptor,
};
pub(crate) use transform::{centered_columns, filter_columns, filter_means, variance_denominator};
