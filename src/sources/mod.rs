//! Historical temperature sources: the local gridded file and the
//! Meteomatics API.
pub mod gridded;
pub mod meteomatics;

pub use gridded::load_temperature_series;
pub use meteomatics::{parse_response, HistoricalRequest, MeteomaticsClient};
