use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use rand::Rng;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Category assigned to every quote that arrives through a remote pull.
pub const SERVER_CATEGORY: &str = "Server";

/// Wire value of the "no category restriction" filter.
pub const ALL_CATEGORIES: &str = "all";

pub const EMPTY_SELECTION_MESSAGE: &str = "no quotes available";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QuoteError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("import error: {0}")]
    Import(String),
    #[error("codec error: {0}")]
    Codec(String),
}

/// One record of the store.
///
/// Imported records are kept exactly as they appeared in the file: whenever the
/// JSON is anything other than a plain `{text, category}` object it is held in
/// `raw` and serialized back unchanged. `text` and `category` are then read from
/// the string fields of that JSON and are empty when missing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Quote {
    pub text: String,
    pub category: String,
    raw: Option<Value>,
}

impl Quote {
    /// Build a user-supplied quote, trimming both fields.
    ///
    /// # Errors
    /// Returns [`QuoteError::Validation`] when either field is blank or the category
    /// is the reserved `"all"`.
    pub fn new(text: &str, category: &str) -> Result<Self, QuoteError> {
        let text = text.trim();
        let category = category.trim();
        if text.is_empty() || category.is_empty() {
            return Err(QuoteError::Validation(
                "please fill in both the quote and category".to_string(),
            ));
        }
        if category == ALL_CATEGORIES {
            return Err(QuoteError::Validation(format!(
                "\"{ALL_CATEGORIES}\" is reserved and cannot be used as a category"
            )));
        }

        Ok(Self::from_parts(text, category))
    }

    /// Plain record with no validation applied.
    #[must_use]
    pub fn from_parts(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self { text: text.into(), category: category.into(), raw: None }
    }

    #[must_use]
    pub fn from_remote(title: &str) -> Self {
        Self::from_parts(title, SERVER_CATEGORY)
    }

    /// Wrap an arbitrary JSON value as a record without rejecting any shape.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        let text = field("text");
        let category = field("category");
        let plain = matches!(&value, Value::Object(object) if object.len() == 2)
            && text.is_some()
            && category.is_some();

        Self {
            text: text.unwrap_or_default(),
            category: category.unwrap_or_default(),
            raw: (!plain).then_some(value),
        }
    }

    /// The verbatim JSON of an imported record, if it differs from `{text, category}`.
    #[must_use]
    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    #[must_use]
    pub fn matches(&self, filter: &CategoryFilter) -> bool {
        match filter {
            CategoryFilter::All => true,
            CategoryFilter::Only(category) => self.category == *category,
        }
    }
}

impl Serialize for Quote {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Some(raw) = &self.raw {
            return raw.serialize(serializer);
        }
        let mut state = serializer.serialize_struct("Quote", 2)?;
        state.serialize_field("text", &self.text)?;
        state.serialize_field("category", &self.category)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Quote {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl Display for Quote {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" - {}", self.text, self.category)
    }
}

/// Seed set used when durable storage holds no usable quotes.
#[must_use]
pub fn default_quotes() -> Vec<Quote> {
    [
        ("The only way to do great work is to love what you do.", "Motivation"),
        ("Life is what happens when you're busy making other plans.", "Life"),
        ("In the middle of difficulty lies opportunity.", "Inspiration"),
    ]
    .into_iter()
    .map(|(text, category)| Quote::from_parts(text, category))
    .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "String", into = "String")]
pub enum CategoryFilter {
    #[default]
    All,
    Only(String),
}

impl CategoryFilter {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == ALL_CATEGORIES {
            Self::All
        } else {
            Self::Only(value.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_CATEGORIES,
            Self::Only(category) => category,
        }
    }
}

impl From<String> for CategoryFilter {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<CategoryFilter> for String {
    fn from(value: CategoryFilter) -> Self {
        value.as_str().to_string()
    }
}

impl Display for CategoryFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MergeSummary {
    pub pulled: usize,
    pub appended: usize,
    pub skipped_duplicates: usize,
}

/// Append every pulled quote whose text is not already present.
///
/// Existing quotes are never replaced or removed. Quotes appended earlier in the
/// same batch count as present, so a batch cannot introduce the same text twice.
pub fn merge_pulled(existing: &mut Vec<Quote>, pulled: Vec<Quote>) -> MergeSummary {
    let mut summary = MergeSummary { pulled: pulled.len(), ..MergeSummary::default() };

    for incoming in pulled {
        if existing.iter().any(|local| local.text == incoming.text) {
            summary.skipped_duplicates += 1;
        } else {
            existing.push(incoming);
            summary.appended += 1;
        }
    }

    summary
}

/// Distinct categories prefixed with the `"all"` sentinel, in first-seen order.
///
/// Imported records with no category, or one spelled like the sentinel, are
/// reachable through `"all"` only and are not listed.
#[must_use]
pub fn categories(quotes: &[Quote]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = vec![ALL_CATEGORIES.to_string()];
    for quote in quotes {
        let category = quote.category.as_str();
        if category.trim().is_empty() || category == ALL_CATEGORIES {
            continue;
        }
        if seen.insert(category) {
            out.push(quote.category.clone());
        }
    }
    out
}

/// Draw one quote uniformly from those matching `filter`.
///
/// `None` is the empty-selection condition.
pub fn select_random<'a, R>(
    quotes: &'a [Quote],
    filter: &CategoryFilter,
    rng: &mut R,
) -> Option<&'a Quote>
where
    R: Rng + ?Sized,
{
    let eligible = quotes.iter().filter(|quote| quote.matches(filter)).collect::<Vec<_>>();
    if eligible.is_empty() {
        return None;
    }

    let index = rng.gen_range(0..eligible.len());
    eligible.get(index).copied()
}

/// Parse an import payload; only a top-level JSON array is accepted.
///
/// Elements are taken verbatim whatever their shape (see [`Quote::from_value`]).
///
/// # Errors
/// Returns [`QuoteError::Import`] for malformed JSON or a non-array value.
pub fn parse_import(json: &str) -> Result<Vec<Quote>, QuoteError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|err| QuoteError::Import(format!("file is not valid JSON: {err}")))?;

    let Value::Array(items) = value else {
        return Err(QuoteError::Import(
            "invalid file format: expected a JSON array of quotes".to_string(),
        ));
    };

    Ok(items.into_iter().map(Quote::from_value).collect())
}

/// Pretty-printed JSON array of the full collection.
///
/// # Errors
/// Returns [`QuoteError::Codec`] if serialization fails.
pub fn export_json(quotes: &[Quote]) -> Result<String, QuoteError> {
    serde_json::to_string_pretty(quotes).map_err(|err| QuoteError::Codec(err.to_string()))
}

/// The in-memory record store. All mutation is append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteBook {
    quotes: Vec<Quote>,
}

impl QuoteBook {
    #[must_use]
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self { quotes }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(default_quotes())
    }

    #[must_use]
    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn add(&mut self, quote: Quote) {
        self.quotes.push(quote);
    }

    /// Append imported quotes verbatim, duplicates included.
    pub fn import(&mut self, quotes: Vec<Quote>) -> usize {
        let count = quotes.len();
        self.quotes.extend(quotes);
        count
    }

    pub fn merge(&mut self, pulled: Vec<Quote>) -> MergeSummary {
        merge_pulled(&mut self.quotes, pulled)
    }

    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        categories(&self.quotes)
    }

    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.quotes.iter().any(|quote| quote.category == category)
    }

    #[must_use]
    pub fn filtered(&self, filter: &CategoryFilter) -> Vec<&Quote> {
        self.quotes.iter().filter(|quote| quote.matches(filter)).collect()
    }

    pub fn select_random<R>(&self, filter: &CategoryFilter, rng: &mut R) -> Option<&Quote>
    where
        R: Rng + ?Sized,
    {
        select_random(&self.quotes, filter, rng)
    }

    #[must_use]
    pub fn into_quotes(self) -> Vec<Quote> {
        self.quotes
    }
}
