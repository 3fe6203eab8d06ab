//! Shared read-through caches and the top-level config store, per
//! spec.md §2 and §5 ("Shared state").

pub mod config_store;
pub mod id_tags_cache;
pub mod station_config_store;
pub mod template_store;

pub use config_store::{ConfigStore, SharedConfigStore};
pub use id_tags_cache::{IdTagsCache, SharedIdTagsCache};
pub use template_store::{SharedTemplateStore, TemplateStore};
