pub mod loader;
pub mod vra_archive;
