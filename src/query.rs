//! The JSON search request accepted by the search endpoints.
//!
//! Requests follow a subset of the Elasticsearch query DSL:
//!
//! ```json
//! { "query": { "match": { "title": "rust" } }, "from": 0, "size": 10 }
//! ```
//!
//! Supported clauses are `match_all`, `match`, `multi_match`, `term`,
//! `terms`, `ids`, `query_string` and `bool`. Malformed clauses fail with a
//! `parsing_exception`, unknown fields with a `query_shard_exception`.

use serde_json::{Map, Value};
use tantivy::{
    Index,
    Term,
    query::{
        AllQuery,
        BooleanQuery,
        EmptyQuery,
        Occur,
        Query,
        QueryParser,
        TermQuery,
        TermSetQuery,
    },
    schema::{Field, IndexRecordOption},
    tokenizer::TokenStream,
};

use crate::{
    error::{Error, Result},
    search_index::SchemaFields,
};

pub const DEFAULT_SIZE: usize = 10;
pub const MAX_RESULT_WINDOW: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: QueryClause,
    pub from: usize,
    pub size: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self::new(QueryClause::MatchAll)
    }
}

impl SearchRequest {
    pub fn new(query: QueryClause) -> Self {
        Self {
            query,
            from: 0,
            size: DEFAULT_SIZE,
        }
    }

    pub fn with_page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    /// Parse a raw request body. An empty body searches everything.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            Error::Validation(format!("malformed search body: {e}"))
        })?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| parsing("search body must be a JSON object"))?;

        let query = match obj.get("query") {
            Some(q) => QueryClause::parse(q)?,
            None => QueryClause::MatchAll,
        };
        Ok(Self {
            query,
            from: usize_field(obj, "from")?.unwrap_or(0),
            size: usize_field(obj, "size")?.unwrap_or(DEFAULT_SIZE),
        })
    }

    pub(crate) fn check_window(&self) -> Result<()> {
        let window = self.from.saturating_add(self.size);
        if window > MAX_RESULT_WINDOW {
            return Err(Error::index(
                "illegal_argument_exception",
                format!(
                    "Result window is too large, from + size must be less \
                     than or equal to: [{MAX_RESULT_WINDOW}] but was [{window}]"
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryClause {
    MatchAll,
    /// Analyzed match against one field.
    Match { field: String, text: String },
    /// Analyzed match against several fields, any of which may match.
    MultiMatch { text: String, fields: Vec<String> },
    /// Exact value of one field.
    Term { field: String, value: String },
    /// Any of several exact values of one field.
    Terms { field: String, values: Vec<String> },
    Ids(Vec<String>),
    /// Tantivy query-parser syntax over title, path and tags.
    QueryString(String),
    Bool {
        must: Vec<QueryClause>,
        should: Vec<QueryClause>,
        must_not: Vec<QueryClause>,
        filter: Vec<QueryClause>,
    },
}

impl QueryClause {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn parse(value: &Value) -> Result<Self> {
        let (kind, body) = single_entry("query", value)?;

        match kind {
            "match_all" => Ok(Self::MatchAll),
            "match" => {
                let (field, spec) = single_entry("match", body)?;
                Ok(Self::Match {
                    field: field.to_string(),
                    text: nested_scalar(spec, "query")
                        .ok_or_else(|| parsing("[match] requires a query"))?,
                })
            }
            "multi_match" => {
                let text = body
                    .get("query")
                    .and_then(scalar_text)
                    .ok_or_else(|| parsing("[multi_match] requires a query"))?;
                let fields = match body.get("fields") {
                    Some(fields) => string_list("multi_match", fields)?,
                    None => Vec::new(),
                };
                Ok(Self::MultiMatch { text, fields })
            }
            "term" => {
                let (field, spec) = single_entry("term", body)?;
                Ok(Self::Term {
                    field: field.to_string(),
                    value: nested_scalar(spec, "value")
                        .ok_or_else(|| parsing("[term] requires a value"))?,
                })
            }
            "terms" => {
                let (field, values) = single_entry("terms", body)?;
                Ok(Self::Terms {
                    field: field.to_string(),
                    values: string_list("terms", values)?,
                })
            }
            "ids" => {
                let values = body
                    .get("values")
                    .ok_or_else(|| parsing("[ids] requires values"))?;
                Ok(Self::Ids(string_list("ids", values)?))
            }
            "query_string" => {
                let text = body
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| parsing("[query_string] requires a query"))?;
                Ok(Self::QueryString(text.to_string()))
            }
            "bool" => {
                let obj = body
                    .as_object()
                    .ok_or_else(|| parsing("[bool] must be an object"))?;
                Ok(Self::Bool {
                    must: clause_list(obj, "must")?,
                    should: clause_list(obj, "should")?,
                    must_not: clause_list(obj, "must_not")?,
                    filter: clause_list(obj, "filter")?,
                })
            }
            other => Err(parsing(format!("unknown query [{other}]"))),
        }
    }

    /// Build the Tantivy query for this clause.
    pub(crate) fn compile(
        &self,
        index: &Index,
        fields: &SchemaFields,
    ) -> Result<Box<dyn Query>> {
        match self {
            Self::MatchAll => Ok(Box::new(AllQuery)),
            Self::Match { field, text } => {
                analyzed(index, fields, resolve(fields, field)?, text)
            }
            Self::MultiMatch { text, fields: names } => {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                if names.is_empty() {
                    clauses.push((
                        Occur::Should,
                        analyzed(index, fields, fields.title, text)?,
                    ));
                }
                for name in names {
                    let field = resolve(fields, name)?;
                    clauses.push((
                        Occur::Should,
                        analyzed(index, fields, field, text)?,
                    ));
                }
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
            Self::Term { field, value } => {
                let field = resolve(fields, field)?;
                Ok(Box::new(TermQuery::new(
                    exact_term(fields, field, value),
                    record_option(fields, field),
                )))
            }
            Self::Terms { field, values } => {
                let field = resolve(fields, field)?;
                let terms = values.iter().map(|v| exact_term(fields, field, v));
                Ok(Box::new(TermSetQuery::new(terms)))
            }
            Self::Ids(values) => {
                let terms =
                    values.iter().map(|v| Term::from_field_text(fields.id, v));
                Ok(Box::new(TermSetQuery::new(terms)))
            }
            Self::QueryString(text) => {
                let parser = QueryParser::for_index(
                    index,
                    vec![fields.title, fields.path, fields.tags],
                );
                parser.parse_query(text).map_err(|e| {
                    Error::index(
                        "query_shard_exception",
                        format!("Failed to parse query [{text}]: {e}"),
                    )
                })
            }
            Self::Bool {
                must,
                should,
                must_not,
                filter,
            } => {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for clause in must.iter().chain(filter) {
                    clauses.push((Occur::Must, clause.compile(index, fields)?));
                }
                for clause in should {
                    clauses
                        .push((Occur::Should, clause.compile(index, fields)?));
                }
                // A bool query with only negative clauses matches everything
                // not excluded.
                if clauses.is_empty() {
                    clauses.push((Occur::Must, Box::new(AllQuery)));
                }
                for clause in must_not {
                    clauses
                        .push((Occur::MustNot, clause.compile(index, fields)?));
                }
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
        }
    }
}

fn parsing(reason: impl Into<String>) -> Error {
    Error::index("parsing_exception", reason)
}

fn resolve(fields: &SchemaFields, name: &str) -> Result<Field> {
    fields.by_name(name).ok_or_else(|| {
        Error::index("query_shard_exception", format!("no such field [{name}]"))
    })
}

fn record_option(fields: &SchemaFields, field: Field) -> IndexRecordOption {
    if field == fields.title {
        IndexRecordOption::WithFreqs
    } else {
        IndexRecordOption::Basic
    }
}

/// Exact term for a keyword field; paths are compared lowercased.
fn exact_term(fields: &SchemaFields, field: Field, value: &str) -> Term {
    if field == fields.path {
        Term::from_field_text(field, &value.to_lowercase())
    } else {
        Term::from_field_text(field, value)
    }
}

/// Run `text` through the field's analyzer and OR the resulting terms.
fn analyzed(
    index: &Index,
    fields: &SchemaFields,
    field: Field,
    text: &str,
) -> Result<Box<dyn Query>> {
    let mut analyzer = index.tokenizer_for_field(field)?;
    let mut terms = Vec::new();
    {
        let mut stream = analyzer.token_stream(text);
        stream.process(&mut |token| {
            terms.push(Term::from_field_text(field, &token.text));
        });
    }

    let option = record_option(fields, field);
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = terms
        .into_iter()
        .map(|term| {
            let query: Box<dyn Query> = Box::new(TermQuery::new(term, option));
            (Occur::Should, query)
        })
        .collect();

    Ok(match clauses.len() {
        0 => Box::new(EmptyQuery),
        1 => clauses.remove(0).1,
        _ => Box::new(BooleanQuery::new(clauses)),
    })
}

fn single_entry<'a>(context: &str, value: &'a Value) -> Result<(&'a str, &'a Value)> {
    let obj = value
        .as_object()
        .ok_or_else(|| parsing(format!("[{context}] must be an object")))?;
    let mut entries = obj.iter();
    match (entries.next(), entries.next()) {
        (Some((key, body)), None) => Ok((key.as_str(), body)),
        _ => Err(parsing(format!(
            "[{context}] must contain exactly one entry"
        ))),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accept either a bare scalar or `{ "<key>": scalar }`.
fn nested_scalar(value: &Value, key: &str) -> Option<String> {
    scalar_text(value).or_else(|| value.get(key).and_then(scalar_text))
}

fn string_list(context: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| parsing(format!("[{context}] expects an array")))?
        .iter()
        .map(|v| {
            scalar_text(v).ok_or_else(|| {
                parsing(format!("[{context}] values must be scalars"))
            })
        })
        .collect()
}

fn clause_list(obj: &Map<String, Value>, key: &str) -> Result<Vec<QueryClause>> {
    match obj.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(QueryClause::parse).collect(),
        Some(single) => Ok(vec![QueryClause::parse(single)?]),
    }
}

fn usize_field(obj: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| parsing(format!("[{key}] must be a non-negative integer"))),
    }
}
