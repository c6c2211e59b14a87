pub mod download;
pub mod financials;
pub mod health;
