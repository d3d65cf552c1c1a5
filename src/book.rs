#[allow(clippy::module_inception)]
pub mod book;
pub mod chapter;
pub mod library;
