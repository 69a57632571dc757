pub mod chart;
pub mod price_point;

pub use price_point::{PricePoint, dedupe_earliest};
