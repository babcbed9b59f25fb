/// Tantivy keyword index for BM25 lexical search
///
/// Built in memory from a fixed set of texts and never mutated afterwards;
/// a changed document set means building a new index.
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

/// Tokenizer name registered on every index: whitespace split, lowercased
const TOKENIZER_NAME: &str = "whitespace_lower";

/// Writer heap budget; a single indexing thread needs at least 15MB
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Search result with ordinal and BM25 score
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSearchResult {
    /// Position of the text in the sequence the index was built from
    pub ordinal: usize,
    /// BM25 relevance score (always positive)
    pub score: f32,
}

/// Split text the way the index does: whitespace, then lowercase
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Tantivy keyword index wrapper
pub struct KeywordIndex {
    reader: IndexReader,
    ordinal_field: Field,
    text_field: Field,
    len: usize,
}

impl KeywordIndex {
    /// Build an index over `texts`; ordinals follow iteration order
    pub fn build<'a, I>(texts: I) -> Result<Self, KeywordIndexError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut schema_builder = Schema::builder();

        let ordinal_field = schema_builder.add_u64_field("ordinal", STORED);
        let text_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let text_field = schema_builder.add_text_field(
            "text",
            TextOptions::default().set_indexing_options(text_indexing),
        );

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        index.tokenizers().register(
            TOKENIZER_NAME,
            TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let mut len = 0;
        for (ordinal, text) in texts.into_iter().enumerate() {
            writer
                .add_document(doc!(
                    ordinal_field => ordinal as u64,
                    text_field => text,
                ))
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
            len += 1;
        }

        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: TantivyError| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            reader,
            ordinal_field,
            text_field,
            len,
        })
    }

    /// Score every indexed text against the query terms
    ///
    /// Returns at most `limit` hits with positive score, best first.
    /// A query with no terms matches nothing.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let term_query = TermQuery::new(
                    Term::from_field_text(self.text_field, term),
                    IndexRecordOption::WithFreqs,
                );
                (Occur::Should, Box::new(term_query) as Box<dyn Query>)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            if score <= 0.0 {
                continue;
            }

            let retrieved_doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let ordinal = retrieved_doc
                .get_first(self.ordinal_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ordinal field".to_string())
                })?;

            results.push(KeywordSearchResult {
                ordinal: ordinal as usize,
                score,
            });
        }

        Ok(results)
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
