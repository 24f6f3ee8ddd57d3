pub mod catalog;
pub mod request_builder;
pub mod result_merger;

pub use catalog::{CatalogSource, StaticCatalog, TomlCatalog};
pub use request_builder::RequestBuilder;
pub use result_merger::{merge, MergeReport, MISSING_RESULT_DETAIL};
