//! Tantivy schema for the lexical index, restricted to the fields the
//! search executor needs to reconstruct and rank a snippet: `path`,
//! `language`, `content`, and the `line_start`/`line_end` bounds the
//! snippet came from. A couple of fast fields the git-aware resolver's
//! enrichment pass fills in (`last_commit_unix_seconds`, `commit_frequency`)
//! ride along for future ranking signals but aren't queried yet.

use tantivy::schema::{Field, Schema, SchemaBuilder, FAST, STORED, STRING};

pub const CODE_TOKENIZER: &str = "code_snippet";

#[derive(Clone)]
pub struct CodeSnippetSchema {
    pub schema: Schema,
    pub path: Field,
    pub language: Field,
    pub content: Field,
    pub line_start: Field,
    pub line_end: Field,
    pub last_commit_unix_seconds: Field,
    pub commit_frequency: Field,
}

impl CodeSnippetSchema {
    pub fn build() -> Self {
        let mut builder = SchemaBuilder::new();
        let path = builder.add_text_field("path", STRING | STORED);
        let language = builder.add_text_field("language", STRING | STORED);

        let content_options = tantivy::schema::TextOptions::default()
            .set_stored()
            .set_indexing_options(
                tantivy::schema::TextFieldIndexing::default()
                    .set_tokenizer(CODE_TOKENIZER)
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            );
        let content = builder.add_text_field("content", content_options);

        let line_start = builder.add_u64_field("line_start", STORED | FAST);
        let line_end = builder.add_u64_field("line_end", STORED | FAST);
        let last_commit_unix_seconds = builder.add_i64_field("last_commit_unix_seconds", FAST);
        let commit_frequency = builder.add_u64_field("commit_frequency", FAST);

        Self {
            schema: builder.build(),
            path,
            language,
            content,
            line_start,
            line_end,
            last_commit_unix_seconds,
            commit_frequency,
        }
    }
}
