pub mod blob;
pub mod inference;
pub mod provenance;
pub mod report;
pub mod settings;
