use std::collections::HashSet;

use crate::error::TokenPoolError;

/// Ordered, immutable list of provider credentials.
///
/// Candidates are always handed out in list order; the pool never reshuffles.
/// Duplicates are allowed and behave as a single credential once excluded.
#[derive(Debug, Clone)]
pub struct TokenPool {
    tokens: Vec<String>,
}

impl TokenPool {
    pub fn new(tokens: Vec<String>) -> Result<Self, TokenPoolError> {
        if tokens.is_empty() {
            return Err(TokenPoolError::Empty);
        }
        Ok(Self { tokens })
    }

    /// First credential in list order that is not in `exclude`.
    pub fn next_candidate(&self, exclude: &HashSet<String>) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| !exclude.contains(t.as_str()))
            .map(String::as_str)
    }

    pub fn all(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Position of `token` in the list. Used for logging instead of the secret itself.
    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }
}
