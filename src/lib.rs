// tasklist - Todo list state machine with filtering, reordering and key-value persistence

pub mod config;
pub mod filter;
pub mod removal;
pub mod storage;
pub mod store;
pub mod task;
pub mod theme;

// Re-export main types for convenience
pub use config::Config;
pub use filter::FilterMode;
pub use removal::RemovalToken;
pub use storage::{Backend, FileStorage, MemoryStorage, SqliteStorage, Storage, now_ms, open_storage};
pub use store::{Change, StateView, StoreOptions, SubscriptionId, TaskListStore};
pub use task::{Task, TaskId};
pub use theme::{Palette, Theme, ThemePreference};
