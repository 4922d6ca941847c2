//! Text similarity scoring for near-duplicate detection.
//!
//! The primary signal is Jaccard overlap of stemmed tokens; when both
//! strings express a recognizable intent (create/fix/update/...), the
//! intent overlap is blended in. A Levenshtein ratio supplies independent
//! fuzzy evidence for typo-level matches. All scores are in `[0, 1]` and
//! symmetric.

use crate::db::ids::compare_ids;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::types::{Task, SIMILARITY_KEY};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Lowercase and trim; the canonical form all scoring runs on.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Light suffix-stripping stemmer, enough to fold common inflections
/// (login/logins, implement/implementing, fix/fixed) onto one stem.
fn stem(word: &str) -> String {
    let w = word;
    if w.len() > 4 && w.ends_with("ies") {
        return format!("{}y", &w[..w.len() - 3]);
    }
    if w.len() > 5 && w.ends_with("ing") {
        return w[..w.len() - 3].to_string();
    }
    if w.len() > 4 && w.ends_with("ed") {
        return w[..w.len() - 2].to_string();
    }
    if w.len() > 3 && w.ends_with("es") {
        return w[..w.len() - 2].to_string();
    }
    if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
        return w[..w.len() - 1].to_string();
    }
    w.to_string()
}

/// Tokenize on non-alphanumerics, drop tokens of length <= 2, stem the rest.
fn stem_set(normalized: &str) -> HashSet<String> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(stem)
        .collect()
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    if inter == 0 {
        return 0.0;
    }
    let union = a.union(b).count();
    inter as f64 / union as f64
}

/// Keyword rules mapping phrasing onto intent labels.
const INTENT_RULES: &[(&str, &str)] = &[
    ("create", r"\b(add|create|implement|build|introduce|setup|new)\b"),
    ("fix", r"\b(fix|repair|resolve|debug|patch|bug|broken)\b"),
    ("update", r"\b(update|upgrade|bump|refresh|improve|enhance)\b"),
    ("remove", r"\b(remove|delete|drop|deprecate|disable)\b"),
    ("test", r"\b(test|verify|validate|cover)\b"),
    ("document", r"\b(document|docs?|readme|changelog|comment)\b"),
    ("refactor", r"\b(refactor|restructure|rewrite|reorganize|cleanup)\b"),
];

struct IntentMatcher {
    rules: Vec<(&'static str, regex_lite::Regex)>,
}

impl IntentMatcher {
    /// `None` when any rule fails to compile; callers degrade to token
    /// overlap only instead of erroring similarity queries.
    fn compile() -> Option<Self> {
        let mut rules = Vec::with_capacity(INTENT_RULES.len());
        for (label, pattern) in INTENT_RULES {
            if let Ok(re) = regex_lite::Regex::new(pattern) {
                rules.push((*label, re));
            } else {
                return None;
            }
        }
        Some(Self { rules })
    }

    fn classify(&self, normalized: &str) -> HashSet<&'static str> {
        self.rules
            .iter()
            .filter(|(_, re)| re.is_match(normalized))
            .map(|(label, _)| *label)
            .collect()
    }
}

fn intent_matcher() -> Option<&'static IntentMatcher> {
    static MATCHER: OnceLock<Option<IntentMatcher>> = OnceLock::new();
    MATCHER.get_or_init(IntentMatcher::compile).as_ref()
}

fn intents(normalized: &str) -> HashSet<&'static str> {
    match intent_matcher() {
        Some(matcher) => matcher.classify(normalized),
        None => HashSet::new(),
    }
}

/// Combined similarity of two strings in `[0, 1]`.
///
/// Equal after normalization is 1; either side empty is 0. Otherwise the
/// stem-set Jaccard is blended with the intent-label Jaccard: equal weight
/// when both sides carry intents, stems dominating (0.8) when not.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }

    let stem_score = jaccard(&stem_set(&na), &stem_set(&nb));

    let ia = intents(&na);
    let ib = intents(&nb);
    let (w, intent_score) = if !ia.is_empty() && !ib.is_empty() {
        (0.5, jaccard(&ia, &ib))
    } else {
        (0.8, 0.0)
    };

    (stem_score * w + intent_score * (1.0 - w)).clamp(0.0, 1.0)
}

/// Edit distance between two strings, by character.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized edit-distance score in `[0, 1]`.
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    let max_len = na.chars().count().max(nb.chars().count());
    1.0 - levenshtein(&na, &nb) as f64 / max_len as f64
}

/// Rank tasks by similarity to `title`, keeping the best of title and
/// description scores per task, filtered at `threshold`.
///
/// With `use_fuzzy`, an edit-distance pass over titles runs at
/// `min(threshold + 0.2, 0.8)` and the two ranked lists merge by task ID,
/// keeping the higher score: independent evidence, strongest signal wins.
pub fn rank_similar(
    tasks: &[Task],
    title: &str,
    threshold: f64,
    use_fuzzy: bool,
) -> Vec<(String, f64)> {
    let mut best: HashMap<String, f64> = HashMap::new();

    for task in tasks {
        let mut score = similarity(title, &task.title);
        if let Some(desc) = task.description.as_deref() {
            score = score.max(similarity(title, desc));
        }
        if score >= threshold {
            best.insert(task.id.clone(), score);
        }
    }

    if use_fuzzy {
        let fuzzy_threshold = (threshold + 0.2).min(0.8);
        for task in tasks {
            let score = fuzzy_score(title, &task.title);
            if score >= fuzzy_threshold {
                let entry = best.entry(task.id.clone()).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
            }
        }
    }

    let mut ranked: Vec<(String, f64)> = best.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_ids(&a.0, &b.0))
    });
    ranked
}

impl Database {
    /// Find stored tasks similar to `title`, each returned copy annotated
    /// with its score under the reserved `_similarity` metadata key. The
    /// annotation is transient and never persisted.
    pub fn find_similar_tasks(
        &self,
        title: &str,
        threshold: f64,
        use_fuzzy: bool,
    ) -> StoreResult<Vec<Task>> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(StoreError::invalid_input(format!(
                "threshold must be in [0, 1], got {}",
                threshold
            ))
            .with_field("threshold"));
        }

        let tasks = self.get_all_tasks()?;
        let ranked = rank_similar(&tasks, title, threshold, use_fuzzy);
        let by_id: HashMap<&str, &Task> =
            tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(id.as_str()).map(|task| {
                    let mut annotated = (*task).clone();
                    annotated
                        .metadata
                        .insert(SIMILARITY_KEY.to_string(), score.into());
                    annotated
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let pairs = [
            ("Implement OAuth login", "Add OAuth based login flow"),
            ("Fix login bug", "Update README typo"),
            ("a", "b"),
            ("same text", "same text"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b);
            let ba = similarity(b, a);
            assert_eq!(ab, ba, "symmetry for {:?}/{:?}", a, b);
            assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(similarity("Fix login bug", "  fix LOGIN bug "), 1.0);
    }

    #[test]
    fn empty_strings_score_zero() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("anything", ""), 0.0);
        assert_eq!(similarity("   ", "anything"), 0.0);
    }

    #[test]
    fn oauth_titles_clear_default_threshold() {
        let score = similarity("Implement OAuth login", "Add OAuth based login flow");
        assert!(score >= 0.3, "got {}", score);
    }

    #[test]
    fn unrelated_titles_stay_below_threshold() {
        let score = similarity("Implement OAuth login", "Update README typo");
        assert!(score < 0.3, "got {}", score);
    }

    #[test]
    fn stemming_folds_inflections() {
        assert_eq!(stem("logins"), "login");
        assert_eq!(stem("implementing"), "implement");
        assert_eq!(stem("fixed"), "fix");
        assert_eq!(stem("dependencies"), "dependency");
        assert_eq!(stem("pass"), "pass");
    }

    #[test]
    fn short_tokens_are_dropped() {
        let set = stem_set("go to ui db fix");
        assert!(set.contains("fix"));
        assert!(!set.contains("go"));
        assert!(!set.contains("ui"));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn fuzzy_score_tolerates_typos() {
        assert!(fuzzy_score("Implement OAuth login", "Implement OAuth logon") > 0.9);
        assert_eq!(fuzzy_score("same", "same"), 1.0);
    }

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: Default::default(),
            readiness: Default::default(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            parent_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn lower_threshold_returns_superset() {
        let tasks = vec![
            task("1", "Implement OAuth login"),
            task("2", "Add OAuth based login flow"),
            task("3", "Update README typo"),
            task("4", "Fix OAuth login redirect"),
        ];
        let loose = rank_similar(&tasks, "OAuth login support", 0.1, true);
        let strict = rank_similar(&tasks, "OAuth login support", 0.5, true);

        let loose_ids: std::collections::HashSet<_> =
            loose.iter().map(|(id, _)| id.clone()).collect();
        for (id, _) in &strict {
            assert!(loose_ids.contains(id), "{} missing from looser query", id);
        }
    }

    #[test]
    fn ranked_results_sorted_descending() {
        let tasks = vec![
            task("1", "Implement OAuth login"),
            task("2", "Add OAuth based login flow"),
            task("3", "Implement OAuth login flow"),
        ];
        let ranked = rank_similar(&tasks, "Implement OAuth login", 0.1, true);
        for pair in ranked.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }
}
