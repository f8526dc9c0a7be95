pub mod approval;
pub mod orders;
pub mod types;
