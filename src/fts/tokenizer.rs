//! Code-aware tokenizer: splits identifiers on case/underscore boundaries
//! and emits bigrams/trigrams of the resulting sub-words, so a query for
//! `read_file` also matches `readFile`/`ReadFile` and fuzzy substrings of
//! either. This is the full-text engine's entire answer to "fuzzy/regex/
//! boolean code search" — no separate fuzzy matcher is layered on top.

use regex::Regex;
use tantivy::tokenizer::{Token, TokenStream, Tokenizer};

#[derive(Clone, Default)]
pub struct CodeSnippetTokenizer;

pub struct CodeSnippetTokenizerStream<'a> {
    _text: &'a str,
    position: usize,
    tokens: Vec<Token>,
}

impl Tokenizer for CodeSnippetTokenizer {
    type TokenStream<'a> = CodeSnippetTokenizerStream<'a>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        let tokens = get_code_tokens_for_string(text);
        CodeSnippetTokenizerStream {
            _text: text,
            position: 0,
            tokens,
        }
    }
}

impl<'a> TokenStream for CodeSnippetTokenizerStream<'a> {
    fn advance(&mut self) -> bool {
        self.position += 1;
        self.position <= self.tokens.len()
    }

    fn token(&self) -> &Token {
        &self.tokens[self.position - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.position - 1]
    }
}

fn check_valid_token(token: &str) -> bool {
    token.len() > 1
}

fn tokenize_call(code: &str) -> Vec<Token> {
    let word_re = Regex::new(r"\b\w+\b").unwrap();
    let camel_re = Regex::new(r"[A-Z][a-z]+|[a-z]+|[A-Z]+(?=[A-Z]|$)").unwrap();
    let mut pos = 0;
    let mut valid_tokens = Vec::new();

    for m in word_re.find_iter(code) {
        let text = m.as_str();
        let parts: Vec<&str> = if text.contains('_') {
            text.split('_').collect()
        } else if text.chars().any(|c| c.is_uppercase()) {
            camel_re.find_iter(text).map(|mat| mat.as_str()).collect()
        } else {
            vec![text]
        };
        for part in parts {
            if check_valid_token(part) {
                valid_tokens.push(Token {
                    offset_from: 0,
                    offset_to: part.len(),
                    position: pos,
                    text: part.to_lowercase(),
                    position_length: 1,
                });
                pos += 1;
            }
        }
    }
    valid_tokens
}

fn create_bigrams(tokens: &[Token]) -> Vec<Token> {
    let mut previous: Option<&Token> = None;
    let mut bigrams = Vec::new();
    for token in tokens {
        if let Some(prev) = previous {
            let bigram = format!("{}_{}", prev.text, token.text);
            bigrams.push(Token {
                offset_from: 0,
                offset_to: bigram.len(),
                position: prev.position,
                text: bigram,
                position_length: 1,
            });
        }
        previous = Some(token);
    }
    bigrams
}

fn create_trigrams(tokens: &[Token]) -> Vec<Token> {
    let mut previous: Option<&Token> = None;
    let mut previous_previous: Option<&Token> = None;
    let mut trigrams = Vec::new();
    for token in tokens {
        if let (Some(prev), Some(prev_prev)) = (previous, previous_previous) {
            let trigram = format!("{}_{}_{}", prev_prev.text, prev.text, token.text);
            trigrams.push(Token {
                offset_from: 0,
                offset_to: trigram.len(),
                position: prev_prev.position,
                text: trigram,
                position_length: 1,
            });
        }
        previous_previous = previous;
        previous = Some(token);
    }
    trigrams
}

fn get_code_tokens_for_string(text: &str) -> Vec<Token> {
    let mut tokens = tokenize_call(text);
    let bigrams = create_bigrams(&tokens);
    let trigrams = create_trigrams(&tokens);
    tokens.extend(bigrams);
    tokens.extend(trigrams);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(text: &str) -> Vec<String> {
        let mut tokenizer = CodeSnippetTokenizer;
        let mut stream = tokenizer.token_stream(text);
        let mut out = Vec::new();
        while stream.advance() {
            out.push(stream.token().text.clone());
        }
        out
    }

    #[test]
    fn splits_snake_case_into_subwords() {
        let tokens = tokenize("read_file");
        assert!(tokens.contains(&"read".to_string()));
        assert!(tokens.contains(&"file".to_string()));
    }

    #[test]
    fn splits_camel_case_into_subwords() {
        let tokens = tokenize("readFile");
        assert!(tokens.contains(&"read".to_string()));
        assert!(tokens.contains(&"file".to_string()));
    }

    #[test]
    fn emits_bigrams_of_subwords() {
        let tokens = tokenize("read_file");
        assert!(tokens.contains(&"read_file".to_string()));
    }
}
