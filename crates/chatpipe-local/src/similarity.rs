//! Fuzzy name comparison used to decide whether a search hit is about the research subject.

/// Edit distance (insert/delete/substitute, unit cost) over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row DP: prev[j] = distance(a[..i], b[..j]).
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// True if two names are equal up to small typos.
///
/// Both sides are trimmed and lowercased. Names of one or two characters must match exactly;
/// longer names may differ by at most 20% of the shorter length (rounded down).
pub fn names_similar(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let la = a.chars().count();
    let lb = b.chars().count();
    if la <= 2 || lb <= 2 {
        return a == b;
    }
    let max_distance = la.min(lb) / 5;
    levenshtein(&a, &b) <= max_distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn short_names_require_exact_match() {
        assert!(names_similar("Al", "Al"));
        assert!(names_similar(" AL ", "al"));
        assert!(!names_similar("Al", "Bo"));
        assert!(!names_similar("Al", "Ala"));
    }

    #[test]
    fn tolerates_small_typos_in_longer_names() {
        // min len 10 -> 2 edits allowed.
        assert!(names_similar("Jane Public", "Jane Publik"));
        assert!(names_similar("jane public", "JANE PUBLIC"));
        // 5 chars -> 1 edit allowed.
        assert!(names_similar("Smith", "Smyth"));
        assert!(!names_similar("Smith", "Smythe"));
        // A page title that merely mentions the name is not "similar".
        assert!(!names_similar("Jane Public", "Jane Public - LinkedIn"));
    }

    proptest! {
        #[test]
        fn similarity_is_reflexive(s in "[a-zA-Z .]{1,24}") {
            prop_assume!(!s.trim().is_empty());
            prop_assert!(names_similar(&s, &s));
        }

        #[test]
        fn similarity_is_symmetric(a in "[a-z ]{0,16}", b in "[a-z ]{0,16}") {
            prop_assert_eq!(names_similar(&a, &b), names_similar(&b, &a));
        }

        #[test]
        fn rejects_more_than_twenty_percent_edits(a in "[a-z]{3,20}", b in "[a-z]{3,20}") {
            let d = levenshtein(&a, &b);
            let max = a.len().min(b.len()) / 5;
            if d > max {
                prop_assert!(!names_similar(&a, &b));
            } else {
                prop_assert!(names_similar(&a, &b));
            }
        }
    }
}
