pub mod processing;
pub mod services;

pub use services::{IngestReceipt, IngestService};
