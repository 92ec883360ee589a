mod clinic_store;

pub use clinic_store::{ClinicStore, InMemoryClinicStore};
