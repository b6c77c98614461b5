pub mod usage_csv;

pub use usage_csv::UsageCsvSource;
