//! JSON file storage

mod store;

pub use store::{read_json, JsonStore};
