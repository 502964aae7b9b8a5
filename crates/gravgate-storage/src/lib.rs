pub mod data_dir;
pub mod entities;
pub mod logs;
pub mod store;

pub use data_dir::DataDir;
pub use logs::LogBuffer;
pub use store::{JsonFile, StoreError};
