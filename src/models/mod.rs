pub mod bookmark;
pub mod classification;
pub mod settings;
pub mod snapshot;
