pub mod fixtures;

pub use fixtures::{TestBed, crm_schema};
