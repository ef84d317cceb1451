#![deny(dead_code)]
#![deny(unused_imports)]

//! Monte Carlo comparison of four ways to put a continuous predictor into a
//! logistic regression: as is, split at the median, split at the data-optimal
//! cutpoint, or as a natural spline.

pub mod basis;
pub mod config;
pub mod cutpoint;
pub mod data;
pub mod diagnostics;
pub mod illustrate;
pub mod inference;
pub mod irls;
pub mod model;
pub mod report;
pub mod runner;
