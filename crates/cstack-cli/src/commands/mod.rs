pub mod export;
pub mod import;

pub use export::ExportCommand;
pub use import::ImportCommand;
