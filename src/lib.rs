pub mod api;
pub mod config;
pub mod currency;
pub mod error;
pub mod exchange_rate;
pub mod normalize;
pub mod query;
pub mod store;
pub mod updater;
pub mod upstream;
pub mod val_curs;

pub use error::RateError;
