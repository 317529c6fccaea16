pub mod collate;
pub mod query_builder;
