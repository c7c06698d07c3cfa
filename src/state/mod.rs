//! Completion state persistence for resumable runs.

mod store;

pub use store::{CompletionStore, InMemoryCompletionStore, JsonFileCompletionStore};
