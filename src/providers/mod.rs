pub mod crossref;
pub mod doi;
