pub mod alert;
pub mod config;
pub mod entity;
pub mod error;
pub mod normalize;
pub mod snapshot;

pub use alert::*;
pub use config::{load_dotenv, EngineConfig, EngineSettings, Thresholds};
pub use entity::*;
pub use error::*;
pub use normalize::{Confidence, LowConfidence};
pub use snapshot::{Snapshot, SnapshotRecords};
