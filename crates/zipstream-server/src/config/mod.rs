pub mod settings;

pub use settings::{DownloadConfig, Settings};
