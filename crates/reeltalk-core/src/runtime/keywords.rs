//! Naive keyword extraction and taxonomy matching.
//!
//! Used to annotate interaction logs and to derive coarse hints for the
//! knowledge-base query. Never used for routing.

use std::collections::HashSet;

use crate::knowledge::QueryParameters;

pub const UNCATEGORIZED: &str = "Uncategorized";

const TRIM_CHARS: &[char] = &['.', ',', '!', '?', '"', '\''];

/// Category names with the keywords that select them, in priority order.
pub const CATEGORY_TABLE: &[(&str, &[&str])] = &[
    ("Timing", &["timing", "season", "best time", "peak season"]),
    ("Gear Selection", &["gear", "equipment", "rod", "reel", "line"]),
    (
        "Bait/Lures/Fly Selection",
        &["bait", "lures", "fly selection", "fly patterns"],
    ),
    (
        "Reading Water",
        &["reading water", "water conditions", "pools", "seams"],
    ),
    (
        "Presenting Bait/Lure/Fly",
        &["presentation", "drift", "swing", "dead drift"],
    ),
    (
        "Handling the Strike or Fight",
        &["handling strike", "fighting fish", "hook set"],
    ),
    ("Casting/Presentation", &["casting", "presentation", "mending"]),
    (
        "Fish Handling/Catch and Release",
        &["handling fish", "catch and release", "revive"],
    ),
];

const BODIES_OF_WATER: &[&str] = &[
    "salmon river",
    "lake ontario",
    "hoh river",
    "chesapeake bay",
    "great lake tributaries",
];

const FISH_SPECIES: &[&str] = &[
    "steelhead",
    "blue crab",
    "striped bass",
    "king salmon",
    "coho salmon",
    "brown trout",
    "eastern menhaden",
    "spot",
    "croaker",
    "black drum",
    "atlantic sturgeon",
];

const WATER_TYPES: &[&str] = &["adronomous", "lentic", "lotic"];

/// Lower-cased words longer than three characters, punctuation trimmed,
/// deduplicated in order of first appearance.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .map(|word| word.trim_matches(TRIM_CHARS).to_lowercase())
        .filter(|word| word.chars().count() > 3)
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Comma-separated categories whose keywords appear verbatim in
/// `keywords`, or [`UNCATEGORIZED`].
pub fn determine_categories(keywords: &[String]) -> String {
    let matched: Vec<&str> = CATEGORY_TABLE
        .iter()
        .filter(|(_, words)| {
            keywords
                .iter()
                .any(|keyword| words.contains(&keyword.as_str()))
        })
        .map(|(category, _)| *category)
        .collect();

    if matched.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        matched.join(", ")
    }
}

/// Coarse taxonomy hints found in a question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyHints {
    pub body_of_water: String,
    pub fish_species: String,
    pub water_type: String,
    pub category: String,
}

impl TaxonomyHints {
    pub fn into_query(self, query: impl Into<String>) -> QueryParameters {
        QueryParameters {
            body_of_water: self.body_of_water,
            fish_species: self.fish_species,
            water_type: self.water_type,
            category: self.category,
            query: query.into(),
        }
    }
}

fn first_contained(haystack: &str, needles: &[&str]) -> String {
    needles
        .iter()
        .find(|needle| haystack.contains(*needle))
        .map(|needle| needle.to_string())
        .unwrap_or_default()
}

/// First substring match from each taxonomy list.
pub fn identify_taxonomy(question: &str) -> TaxonomyHints {
    let lower = question.to_lowercase();
    let category = CATEGORY_TABLE
        .iter()
        .find(|(_, words)| words.iter().any(|word| lower.contains(word)))
        .map(|(category, _)| category.to_string())
        .unwrap_or_default();

    TaxonomyHints {
        body_of_water: first_contained(&lower, BODIES_OF_WATER),
        fish_species: first_contained(&lower, FISH_SPECIES),
        water_type: first_contained(&lower, WATER_TYPES),
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords_filters_and_dedupes() {
        let keywords = extract_keywords("What reel? The REEL, the \"best\" line for Steelhead!");
        assert_eq!(keywords, vec!["what", "reel", "best", "line", "steelhead"]);
    }

    #[test]
    fn test_extract_keywords_drops_short_words() {
        assert!(extract_keywords("a an the rod").is_empty());
    }

    #[test]
    fn test_categories_in_table_order() {
        let keywords = extract_keywords("which rod and bait during the season");
        assert_eq!(
            determine_categories(&keywords),
            "Timing, Bait/Lures/Fly Selection"
        );
    }

    #[test]
    fn test_unmatched_is_uncategorized() {
        assert_eq!(determine_categories(&[]), UNCATEGORIZED);
        assert_eq!(
            determine_categories(&extract_keywords("hello there friends")),
            UNCATEGORIZED
        );
    }

    #[test]
    fn test_identify_taxonomy() {
        let hints = identify_taxonomy(
            "Best time to swing flies for Steelhead on the Salmon River in lotic water?",
        );
        assert_eq!(hints.body_of_water, "salmon river");
        assert_eq!(hints.fish_species, "steelhead");
        assert_eq!(hints.water_type, "lotic");
        assert_eq!(hints.category, "Timing");

        let query = hints.into_query("q");
        assert_eq!(query.query, "q");
        assert_eq!(query.fish_species, "steelhead");
    }

    #[test]
    fn test_identify_taxonomy_empty_when_no_match() {
        assert_eq!(identify_taxonomy("hello"), TaxonomyHints::default());
    }
}
