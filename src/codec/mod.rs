//! Reversible term substitution.
//!
//! [`SubstitutionCodec`] replaces sensitive terms with innocuous ones
//! ([`encode`](SubstitutionCodec::encode)) and restores them
//! ([`decode`](SubstitutionCodec::decode)). Matching is whole-word and
//! case-insensitive.
//!
//! # Case handling
//!
//! In [`CaseMode::Compatible`] a matched span is looked up with its exact
//! casing, so `HOGWARTS` is matched but left alone when only `Hogwarts` is a
//! key. [`CaseMode::Folded`] replaces every span with the replacement of the
//! term the matcher reported, so any casing the matcher accepts is replaced.
//!
//! # Reverse collisions
//!
//! If two sensitive terms share a replacement, decoding restores the one
//! inserted last.

mod map;
mod matcher;

pub use map::ReplacementMap;
pub use matcher::{RegexMatcher, TermMatch, TermMatcher};

use crate::llm::LlmProvider;
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Instant;
use tracing::Instrument;

/// How a matched span is resolved to its substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    /// Exact-case lookup after case-insensitive matching.
    #[default]
    Compatible,
    /// Every casing the matcher accepts is replaced.
    Folded,
}

impl CaseMode {
    /// Parses a mode name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compatible" | "exact" => Some(Self::Compatible),
            "folded" | "fold" | "insensitive" => Some(Self::Folded),
            _ => None,
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compatible => "compatible",
            Self::Folded => "folded",
        }
    }
}

/// One direction of the codec.
#[derive(Debug)]
struct SubstitutionTable {
    matcher: Box<dyn TermMatcher>,
    exact: HashMap<String, String>,
    by_term: Vec<String>,
    case_mode: CaseMode,
}

impl SubstitutionTable {
    /// Builds a table from ordered pairs with unique sources.
    fn build(pairs: &[(&str, &str)], case_mode: CaseMode) -> Result<Self> {
        let matcher = RegexMatcher::new(pairs.iter().map(|(from, _)| *from))?;

        let exact = pairs
            .iter()
            .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
            .collect();
        let by_term = pairs.iter().map(|(_, to)| (*to).to_string()).collect();

        Ok(Self {
            matcher: Box::new(matcher),
            exact,
            by_term,
            case_mode,
        })
    }

    /// Compatible mode looks the matched text up verbatim; folded mode takes
    /// the replacement of whichever term the matcher reported.
    fn resolve(&self, matched: &TermMatch, text: &str) -> Option<&str> {
        match self.case_mode {
            CaseMode::Compatible => self.exact.get(&text[matched.span.clone()]),
            CaseMode::Folded => self.by_term.get(matched.term),
        }
        .map(String::as_str)
    }

    /// Rewrites `text`, returning the result and the number of replacements.
    fn apply(&self, text: &str) -> (String, usize) {
        let matches = self.matcher.find(text);
        if matches.is_empty() {
            return (text.to_string(), 0);
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut replaced = 0;

        for found in matches {
            let span = found.span.clone();
            out.push_str(&text[cursor..span.start]);
            if let Some(substitute) = self.resolve(&found, text) {
                out.push_str(substitute);
                replaced += 1;
            } else {
                out.push_str(&text[span.clone()]);
            }
            cursor = span.end;
        }
        out.push_str(&text[cursor..]);

        (out, replaced)
    }
}

/// Bidirectional whole-word substitution codec.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug)]
pub struct SubstitutionCodec {
    map: ReplacementMap,
    forward: SubstitutionTable,
    reverse: SubstitutionTable,
    case_mode: CaseMode,
}

impl SubstitutionCodec {
    /// Creates a codec in [`CaseMode::Compatible`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the map is empty.
    pub fn new(map: ReplacementMap) -> Result<Self> {
        Self::with_case_mode(map, CaseMode::default())
    }

    /// Creates a codec with an explicit case mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the map is empty.
    pub fn with_case_mode(map: ReplacementMap, case_mode: CaseMode) -> Result<Self> {
        if map.is_empty() {
            return Err(Error::Configuration(
                "replacement map must contain at least one term".to_string(),
            ));
        }

        let forward_pairs: Vec<(&str, &str)> = map.iter().collect();
        let forward = SubstitutionTable::build(&forward_pairs, case_mode)?;

        let inverted = map.inverted();
        let collisions = map.len() - inverted.len();
        if collisions > 0 {
            tracing::warn!(
                collisions,
                "Replacement terms are shared; decoding restores the last inserted term"
            );
        }
        let reverse_pairs: Vec<(&str, &str)> = inverted
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        let reverse = SubstitutionTable::build(&reverse_pairs, case_mode)?;

        tracing::debug!(
            terms = map.len(),
            case_mode = case_mode.as_str(),
            "Substitution codec ready"
        );

        Ok(Self {
            map,
            forward,
            reverse,
            case_mode,
        })
    }

    /// Replaces sensitive terms with their replacements.
    #[must_use]
    pub fn encode(&self, text: &str) -> String {
        self.forward.apply(text).0
    }

    /// Restores sensitive terms from their replacements.
    #[must_use]
    pub fn decode(&self, text: &str) -> String {
        self.reverse.apply(text).0
    }

    /// Encodes `text`, sends it as a single-turn chat to `llm` and decodes
    /// the first completion.
    ///
    /// Neither the input nor the model output is logged; only sizes and
    /// counts are recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] or [`Error::Timeout`] from the provider.
    pub async fn answer_with_llm(
        &self,
        text: &str,
        llm: &dyn LlmProvider,
        model: &str,
    ) -> Result<String> {
        let span = tracing::info_span!(
            "veil.answer",
            provider = llm.name(),
            model = model,
            input_bytes = text.len(),
            encoded_terms = tracing::field::Empty,
            decoded_terms = tracing::field::Empty,
            status = tracing::field::Empty
        );

        async {
            let span = tracing::Span::current();
            let start = Instant::now();

            let (encoded, encoded_terms) = self.forward.apply(text);
            span.record("encoded_terms", encoded_terms);

            let completion = match llm.complete(model, &encoded).await {
                Ok(completion) => completion,
                Err(err) => {
                    span.record("status", "error");
                    metrics::counter!("veil_answers_total", "status" => "error").increment(1);
                    tracing::warn!(error = %err, "Upstream completion failed");
                    return Err(err);
                },
            };

            let (decoded, decoded_terms) = self.reverse.apply(&completion);
            span.record("decoded_terms", decoded_terms);
            span.record("status", "success");

            let elapsed = start.elapsed();
            metrics::counter!("veil_answers_total", "status" => "success").increment(1);
            metrics::histogram!("veil_answer_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
            tracing::info!(
                output_bytes = decoded.len(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Answered query"
            );

            Ok(decoded)
        }
        .instrument(span)
        .await
    }

    /// Returns the configured map.
    #[must_use]
    pub const fn replacement_map(&self) -> &ReplacementMap {
        &self.map
    }

    /// Returns the case mode.
    #[must_use]
    pub const fn case_mode(&self) -> CaseMode {
        self.case_mode
    }

    /// Number of sensitive terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no terms are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harry_potter() -> ReplacementMap {
        ReplacementMap::from_pairs([
            ("Hogwarts", "Hogsmith State Secondary School"),
            ("Albus Dumbledore", "Merlin"),
            ("Ministry of Magic", "London Bureau of Immigration and Statistics"),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_map_rejected() {
        let err = SubstitutionCodec::new(ReplacementMap::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_encode_exact_case() {
        let codec = SubstitutionCodec::new(harry_potter()).unwrap();
        assert_eq!(
            codec.encode("I love Hogwarts"),
            "I love Hogsmith State Secondary School"
        );
    }

    #[test]
    fn test_encode_other_case_left_unchanged_in_compatible_mode() {
        let codec = SubstitutionCodec::new(harry_potter()).unwrap();
        assert_eq!(codec.encode("I love HOGWARTS"), "I love HOGWARTS");
        assert_eq!(codec.encode("hogwarts"), "hogwarts");
    }

    #[test]
    fn test_folded_mode_replaces_every_casing() {
        let codec = SubstitutionCodec::with_case_mode(harry_potter(), CaseMode::Folded).unwrap();
        assert_eq!(
            codec.encode("I love HOGWARTS"),
            "I love Hogsmith State Secondary School"
        );
        assert_eq!(
            codec.decode("MERLIN says hi"),
            "Albus Dumbledore says hi"
        );
    }

    #[test]
    fn test_folded_mode_follows_unicode_case_folding() {
        let map = ReplacementMap::from_pairs([("ΣΟΦΟΣ", "Sage")]).unwrap();
        let codec = SubstitutionCodec::with_case_mode(map, CaseMode::Folded).unwrap();
        for variant in ["ΣΟΦΟΣ", "σοφος", "σοφοσ", "Σοφοσ", "σοφοΣ"] {
            assert_eq!(codec.encode(&format!("ask {variant} now")), "ask Sage now");
        }
    }

    #[test]
    fn test_decode_restores_terms() {
        let codec = SubstitutionCodec::new(harry_potter()).unwrap();
        let encoded = codec.encode("Albus Dumbledore runs Hogwarts");
        assert_eq!(encoded, "Merlin runs Hogsmith State Secondary School");
        assert_eq!(codec.decode(&encoded), "Albus Dumbledore runs Hogwarts");
    }

    #[test]
    fn test_substrings_not_replaced() {
        let map = ReplacementMap::from_pairs([("cat", "dog")]).unwrap();
        let codec = SubstitutionCodec::new(map).unwrap();
        assert_eq!(codec.encode("category cat scat"), "category dog scat");
    }

    #[test]
    fn test_shared_replacement_decodes_to_last_inserted() {
        let map = ReplacementMap::from_pairs([
            ("Albus Dumbledore", "Merlin"),
            ("Gandalf", "Merlin"),
        ])
        .unwrap();
        let codec = SubstitutionCodec::new(map).unwrap();

        assert_eq!(codec.encode("Albus Dumbledore"), "Merlin");
        assert_eq!(codec.encode("Gandalf"), "Merlin");
        assert_eq!(codec.decode("Merlin"), "Gandalf");
    }

    #[test]
    fn test_replacement_is_not_template_expanded() {
        let map = ReplacementMap::from_pairs([("price", "$1 ${0}")]).unwrap();
        let codec = SubstitutionCodec::new(map).unwrap();
        assert_eq!(codec.encode("the price"), "the $1 ${0}");
    }

    #[test]
    fn test_case_mode_parse() {
        assert_eq!(CaseMode::parse("Folded"), Some(CaseMode::Folded));
        assert_eq!(CaseMode::parse("compatible"), Some(CaseMode::Compatible));
        assert_eq!(CaseMode::parse("nope"), None);
    }

    #[test]
    fn test_codec_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SubstitutionCodec>();
    }
}
