//! Account persistence.
//!
//! - `AccountStore`: the contract the dispatcher and producers depend on
//! - `SqliteAccountStore`: SQLite implementation
//! - `import_json`: merge of the legacy `users.json` export

mod import;
mod sqlite;
mod traits;

pub use import::{ExportedUser, ImportReport, import_json, read_export};
pub use sqlite::SqliteAccountStore;
pub use traits::{AccountCounts, AccountStore};
