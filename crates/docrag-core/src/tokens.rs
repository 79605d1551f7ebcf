use crate::traits::TokenCounter;

/// Characters assumed per token when no tokenizer is loaded.
pub const CHARS_PER_TOKEN: usize = 4;

/// Character-based estimate used when no tokenizer is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn name(&self) -> &str { "char-estimate" }

    fn count(&self, text: &str) -> usize { text.chars().count() / CHARS_PER_TOKEN }
}
