mod sqlite;

pub use sqlite::{DbError, SqliteVatStore};
