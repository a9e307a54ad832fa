use indexmap::IndexSet;

const BEGIN_MARK: char = '\u{2}';
const END_MARK: char = '\u{3}';

/// Bag-of-n-grams text featurizer.
///
/// Terms are word unigrams, word bigrams and character trigrams of the lowercased text
/// (trigrams include begin/end markers). The vocabulary is fixed at fit time in first-seen
/// order; vectors hold term counts scaled to unit L2 norm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFeaturizer {
    vocabulary: IndexSet<String>,
}

impl TextFeaturizer {
    /// Builds the vocabulary from training texts.
    pub fn fit<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut vocabulary = IndexSet::new();
        for text in texts {
            vocabulary.extend(terms(text));
        }
        Self { vocabulary }
    }

    /// Output width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.vocabulary.len()
    }

    /// Featurizes one text; unknown terms are ignored and empty text yields zeros.
    #[must_use]
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut counts = vec![0.0f32; self.vocabulary.len()];
        for term in terms(text) {
            if let Some(slot) = self.vocabulary.get_index_of(&term) {
                counts[slot] += 1.0;
            }
        }
        let norm = counts.iter().map(|c| c * c).sum::<f32>().sqrt();
        if norm > 0.0 {
            for count in &mut counts {
                *count /= norm;
            }
        }
        counts
    }
}

fn terms(text: &str) -> Vec<String> {
    let normalized = text.to_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let mut out: Vec<String> = words.iter().map(|w| format!("w:{w}")).collect();
    out.extend(words.windows(2).map(|pair| format!("b:{} {}", pair[0], pair[1])));

    let joined = words.join(" ");
    let chars: Vec<char> = std::iter::once(BEGIN_MARK)
        .chain(joined.chars())
        .chain(std::iter::once(END_MARK))
        .collect();
    out.extend(
        chars
            .windows(3)
            .map(|tri| format!("c:{}", tri.iter().collect::<String>())),
    );
    out
}
