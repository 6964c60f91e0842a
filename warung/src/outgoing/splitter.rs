//! Sentence-boundary message splitter.

/// Splits long messages into sentence-based chunks for mobile readability.
#[derive(Clone, Copy, Debug)]
pub struct MessageSplitter {
    /// Maximum characters per chunk.
    pub max_length: usize,
    /// Messages at or below this length are never split.
    pub min_split_length: usize,
}

impl Default for MessageSplitter {
    fn default() -> Self {
        Self {
            max_length: 1000,
            min_split_length: 500,
        }
    }
}

impl MessageSplitter {
    pub fn new(max_length: usize, min_split_length: usize) -> Self {
        Self {
            max_length,
            min_split_length,
        }
    }

    pub fn split_into_chunks(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.min_split_length {
            return vec![text.trim().to_string()];
        }

        let sentences = split_sentences(text);
        self.group_into_chunks(&sentences)
    }

    fn group_into_chunks(&self, sentences: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let sentence_len = sentence.chars().count();

            if sentence_len > self.max_length {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                    current.clear();
                    current_len = 0;
                }
                chunks.extend(self.force_split(sentence));
                continue;
            }

            // +1 for the joining space.
            if !current.is_empty() && current_len + 1 + sentence_len > self.max_length {
                chunks.push(current.join(" "));
                current.clear();
                current_len = 0;
            }
            if !current.is_empty() {
                current_len += 1;
            }
            current.push(sentence);
            current_len += sentence_len;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }

    /// Word-boundary split for a single over-long sentence.
    fn force_split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for word in text.split_whitespace() {
            let word_len = word.chars().count();
            if !current.is_empty() && current_len + 1 + word_len > self.max_length {
                chunks.push(current.join(" "));
                current.clear();
                current_len = 0;
            }
            if !current.is_empty() {
                current_len += 1;
            }
            current.push(word);
            current_len += word_len;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }
}

/// Split on `. ! ?` followed by whitespace, keeping the punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut prev_was_terminal = false;

    for (i, c) in text.char_indices() {
        if prev_was_terminal && c.is_whitespace() {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = i;
        }
        prev_was_terminal = matches!(c, '.' | '!' | '?');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_trimmed_chunk() {
        let splitter = MessageSplitter::default();
        let chunks = splitter.split_into_chunks("  Halo! Pesanan kamu sudah dikirim.  ");
        assert_eq!(chunks, vec!["Halo! Pesanan kamu sudah dikirim."]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(MessageSplitter::default().split_into_chunks("").is_empty());
    }

    #[test]
    fn sentences_are_split_on_terminal_punctuation() {
        let sentences = split_sentences("Satu. Dua! Tiga? Empat");
        assert_eq!(sentences, vec!["Satu.", "Dua!", "Tiga?", "Empat"]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let sentences = split_sentences("Harganya 1.5 juta rupiah. Mau lanjut?");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "Harganya 1.5 juta rupiah.");
    }

    /// **Scenario**: long text packs greedily into chunks under max_length.
    #[test]
    fn long_text_packs_into_bounded_chunks() {
        let splitter = MessageSplitter::new(100, 50);
        let text = "Kalimat pertama yang cukup panjang untuk menguji. \
                    Kalimat kedua juga lumayan panjang ya. \
                    Kalimat ketiga menutup pesan ini dengan baik.";
        let chunks = splitter.split_into_chunks(text);
        assert!(chunks.len() >= 2, "chunks: {chunks:?}");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100, "oversized chunk: {chunk}");
        }
        // Order preserved.
        assert!(chunks[0].starts_with("Kalimat pertama"));
        assert!(chunks.last().unwrap().ends_with("dengan baik."));
    }

    /// **Scenario**: a single sentence over max_length is force-split on
    /// word boundaries, never mid-word.
    #[test]
    fn oversized_sentence_force_splits_on_words() {
        let splitter = MessageSplitter::new(30, 10);
        let text = "kata ".repeat(20);
        let chunks = splitter.split_into_chunks(text.trim());
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30);
            for word in chunk.split(' ') {
                assert_eq!(word, "kata");
            }
        }
    }

    #[test]
    fn threshold_boundary_not_split() {
        let splitter = MessageSplitter::new(1000, 500);
        let text = "a".repeat(500);
        assert_eq!(splitter.split_into_chunks(&text).len(), 1);
    }
}
