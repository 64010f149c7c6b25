use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use quote_kernel_core::{
    export_json, parse_import, CategoryFilter, MergeSummary, Quote, QuoteBook, QuoteError,
    EMPTY_SELECTION_MESSAGE,
};
use quote_kernel_store_sqlite::{LoadOrigin, SchemaStatus, SessionId, SqliteStore};
use quote_kernel_sync::{PushOutcome, QuoteRemote};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod config;

pub use config::{QuoteKernelConfig, DEFAULT_DB_PATH};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuoteList {
    pub quotes: Vec<Quote>,
    pub origin: LoadOrigin,
    pub categories: Vec<String>,
    pub selected_category: CategoryFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddQuoteRequest {
    pub text: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddQuoteResult {
    pub quote: Quote,
    pub total_quotes: usize,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryList {
    pub categories: Vec<String>,
    pub selected: CategoryFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RandomQuote {
    Selected { quote: Quote, category: CategoryFilter },
    Empty { category: CategoryFilter, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteExport {
    pub quotes: usize,
    pub json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportResult {
    pub imported: usize,
    pub total_quotes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub appended: usize,
    pub skipped_duplicates: usize,
    pub total_quotes: Option<usize>,
    pub error: Option<String>,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

/// Library facade over storage, selection, and the remote exchange.
///
/// Each call opens the database, so clones can be handed to independent tasks.
#[derive(Clone)]
pub struct QuoteKernelApi {
    db_path: PathBuf,
    remote: Arc<dyn QuoteRemote>,
    session: SessionId,
}

impl Debug for QuoteKernelApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteKernelApi")
            .field("db_path", &self.db_path)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl QuoteKernelApi {
    /// Create an API bound to a fresh session.
    #[must_use]
    pub fn new(db_path: PathBuf, remote: Arc<dyn QuoteRemote>) -> Self {
        Self::with_session(db_path, remote, SessionId::new())
    }

    #[must_use]
    pub fn with_session(db_path: PathBuf, remote: Arc<dyn QuoteRemote>, session: SessionId) -> Self {
        Self { db_path, remote, session }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when storage cannot be read.
    pub fn list_quotes(&self) -> Result<QuoteList> {
        let store = self.open_migrated()?;
        let loaded = store.load_quotes()?;
        let book = QuoteBook::new(loaded.quotes);
        Ok(QuoteList {
            categories: book.categories(),
            selected_category: store.selected_category()?,
            origin: loaded.origin,
            quotes: book.into_quotes(),
        })
    }

    /// Validate, append, and persist one quote. Pushing it remotely is a separate,
    /// best-effort step (see [`Self::push_quote`]).
    ///
    /// # Errors
    /// Returns an error when either field is blank (nothing is written) or storage fails.
    pub fn add_quote(&self, input: AddQuoteRequest) -> Result<AddQuoteResult> {
        let quote = Quote::new(&input.text, &input.category)?;
        let mut store = self.open_migrated()?;
        let mut book = QuoteBook::new(store.load_quotes()?.quotes);
        book.add(quote.clone());
        store.save_quotes(book.quotes())?;
        tracing::info!(category = %quote.category, total = book.len(), "quote added");

        Ok(AddQuoteResult { quote, total_quotes: book.len(), categories: book.categories() })
    }

    /// Send a quote to the remote. Never fails and never touches local storage.
    #[must_use]
    pub fn push_quote(&self, quote: &Quote) -> PushOutcome {
        self.remote.push(quote)
    }

    /// # Errors
    /// Returns an error when storage cannot be read.
    pub fn categories(&self) -> Result<CategoryList> {
        let store = self.open_migrated()?;
        let book = QuoteBook::new(store.load_quotes()?.quotes);
        Ok(CategoryList { categories: book.categories(), selected: store.selected_category()? })
    }

    /// Persist the category filter; `value` must be `"all"` or a known category.
    ///
    /// # Errors
    /// Returns an error for an unknown category or a storage failure.
    pub fn select_category(&self, value: &str) -> Result<CategoryList> {
        let filter = CategoryFilter::parse(value);
        let mut store = self.open_migrated()?;
        let book = QuoteBook::new(store.load_quotes()?.quotes);

        if let CategoryFilter::Only(category) = &filter {
            if !book.has_category(category) {
                return Err(anyhow!(QuoteError::Validation(format!("unknown category: {category}"))));
            }
        }

        store.save_selected_category(&filter)?;
        Ok(CategoryList { categories: book.categories(), selected: filter })
    }

    /// Pick a random quote, restricted by `filter` or else by the persisted selection.
    /// A hit is remembered as the session's last quote; an empty pool writes nothing.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub fn show_random(&self, filter: Option<CategoryFilter>) -> Result<RandomQuote> {
        let mut store = self.open_migrated()?;
        let category = match filter {
            Some(filter) => filter,
            None => store.selected_category()?,
        };
        let book = QuoteBook::new(store.load_quotes()?.quotes);

        let Some(quote) = book.select_random(&category, &mut rand::thread_rng()).cloned() else {
            tracing::info!(%category, "{EMPTY_SELECTION_MESSAGE}");
            return Ok(RandomQuote::Empty {
                category,
                message: EMPTY_SELECTION_MESSAGE.to_string(),
            });
        };

        store.save_last_quote(self.session, &quote)?;
        Ok(RandomQuote::Selected { quote, category })
    }

    /// # Errors
    /// Returns an error when storage fails.
    pub fn last_quote(&self) -> Result<Option<Quote>> {
        let store = self.open_migrated()?;
        store.last_quote(self.session)
    }

    /// Pretty-printed JSON array of every stored quote.
    ///
    /// # Errors
    /// Returns an error when storage or serialization fails.
    pub fn export_quotes(&self) -> Result<QuoteExport> {
        let store = self.open_migrated()?;
        let quotes = store.load_quotes()?.quotes;
        Ok(QuoteExport { quotes: quotes.len(), json: export_json(&quotes)? })
    }

    /// Append every element of a JSON array payload verbatim and persist.
    ///
    /// # Errors
    /// Returns an error when the payload is not a JSON array; storage is then left
    /// untouched.
    pub fn import_quotes(&self, json: &str) -> Result<ImportResult> {
        let imported = parse_import(json)?;
        let mut store = self.open_migrated()?;
        let mut book = QuoteBook::new(store.load_quotes()?.quotes);
        let count = book.import(imported);
        store.save_quotes(book.quotes())?;
        tracing::info!(imported = count, total = book.len(), "quotes imported");

        Ok(ImportResult { imported: count, total_quotes: book.len() })
    }

    /// Pull one remote batch and merge it. A failed pull is reported, not raised.
    ///
    /// # Errors
    /// Returns an error only when local storage fails.
    pub fn sync_once(&self) -> Result<SyncReport> {
        let pulled = self.remote.pull();
        let synced_at = OffsetDateTime::now_utc();

        if let Some(error) = pulled.error {
            return Ok(SyncReport {
                pulled: 0,
                appended: 0,
                skipped_duplicates: 0,
                total_quotes: None,
                error: Some(error),
                message: None,
                synced_at,
            });
        }

        let mut store = self.open_migrated()?;
        let mut book = QuoteBook::new(store.load_quotes()?.quotes);
        let MergeSummary { pulled, appended, skipped_duplicates } = book.merge(pulled.quotes);
        if appended > 0 {
            store.save_quotes(book.quotes())?;
        }
        tracing::info!(pulled, appended, skipped_duplicates, "quotes synced with server");

        Ok(SyncReport {
            pulled,
            appended,
            skipped_duplicates,
            total_quotes: Some(book.len()),
            error: None,
            message: Some("quotes synced with server".to_string()),
            synced_at,
        })
    }

    /// Drop this session's ephemeral values.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub fn end_session(&self) -> Result<usize> {
        let mut store = self.open_migrated()?;
        store.end_session(self.session).context("failed to end api session")
    }
}
