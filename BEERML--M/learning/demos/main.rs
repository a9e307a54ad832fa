//! The two end-to-end demos: drink type classification and daily consumption forecasting.
//!
//! Each `run` function returns a structured report; printing and file output are left to the
//! caller.

/// Drink type classification from name and country.
pub mod classification;
/// Daily consumption forecasting with Poisson regression.
pub mod regression;
