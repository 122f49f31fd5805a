pub mod export;
pub mod record;
pub mod recurrence;
pub mod store;
pub mod view;
pub mod wish;

pub use crate::export::ExportFormat;
pub use crate::record::{Category, DraftError, Record, RecordDraft, RecordId};
pub use crate::store::{
    FileBackend, KeyValueBackend, LoadOutcome, MemoryBackend, PendingRemoval, RecordSet,
    RecordStore, StoreError,
};
pub use crate::view::{build_view, TypeFilter, View, ViewEntry, ViewQuery};
pub use crate::wish::{draft_wish, GeminiClient, WishGenerator, WishOutcome};
