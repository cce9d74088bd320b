use serde::{Deserialize, Serialize};
pub mod job;
pub mod visual_asset;
pub mod word_context;

/// A value persisted as one SurrealDB record under `table_name():record_id()`.
pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn record_id(&self) -> String;
}
