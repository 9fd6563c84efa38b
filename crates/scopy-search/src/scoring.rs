//! Fuzzy scoring formulas (spec §4.5 "FullFuzzyIndex scoring"). A single
//! "fuzzy single token" function unifies the two branches the spec
//! describes for plain `fuzzy` mode (substring-position for queries of
//! UTF-16 length ≤2, single-pass subsequence match otherwise); `fuzzyPlus`
//! calls it per-token and additionally forces the substring branch for any
//! token with ≥3 ASCII characters.

pub fn utf16_len(s: &str) -> i64 {
    s.encode_utf16().count() as i64
}

fn ascii_char_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii()).count()
}

/// `m*10 - (m-1) - position`, `None` if `needle` doesn't occur in `haystack`.
pub fn substring_score(haystack: &str, needle: &str) -> Option<i64> {
    if needle.is_empty() {
        return None;
    }
    let position = haystack.find(needle)? as i64;
    let m = utf16_len(needle);
    Some(m * 10 - (m - 1) - position)
}

/// Single-pass subsequence match: every character of `needle` (in order)
/// must occur in `haystack`. Score is `matched*10 - span - sum_of_gaps`.
pub fn subsequence_score(haystack: &str, needle: &str) -> Option<i64> {
    if needle.is_empty() {
        return None;
    }
    let mut needle_chars = needle.chars().peekable();
    let mut matched_positions = Vec::new();
    for (idx, ch) in haystack.chars().enumerate() {
        if let Some(&want) = needle_chars.peek() {
            if ch == want {
                matched_positions.push(idx as i64);
                needle_chars.next();
            }
        } else {
            break;
        }
    }
    if needle_chars.peek().is_some() {
        return None; // not every needle character was consumed
    }
    let matched = matched_positions.len() as i64;
    let first = *matched_positions.first()?;
    let last = *matched_positions.last()?;
    let span = last - first + 1;
    let gaps: i64 = matched_positions.windows(2).map(|w| w[1] - w[0] - 1).sum();
    Some(matched * 10 - span - gaps)
}

/// The scoring function used for whole-query `fuzzy` mode, and for
/// `fuzzyPlus` tokens with fewer than 3 ASCII characters.
pub fn fuzzy_single_score(haystack: &str, needle_lower: &str) -> Option<i64> {
    if utf16_len(needle_lower) <= 2 {
        substring_score(haystack, needle_lower)
    } else {
        subsequence_score(haystack, needle_lower)
    }
}

/// `fuzzyPlus` mode: split `query_lower` on whitespace; each token scores
/// independently and a missing token vetoes the whole candidate.
pub fn fuzzy_plus_score(haystack: &str, query_lower: &str) -> Option<i64> {
    let mut total = 0i64;
    let mut any_token = false;
    for token in query_lower.split_whitespace() {
        any_token = true;
        let score = if ascii_char_count(token) >= 3 {
            substring_score(haystack, token)?
        } else {
            fuzzy_single_score(haystack, token)?
        };
        total += score;
    }
    if !any_token {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_score_rewards_earlier_position() {
        let early = substring_score("hello world", "wor").unwrap();
        let late = substring_score("say hello wor", "wor").unwrap();
        assert!(early > late);
    }

    #[test]
    fn exact_text_match_is_the_maximum_score_for_that_query() {
        let exact = subsequence_score("hello", "hello").unwrap();
        let partial = subsequence_score("hello there friend", "hello").unwrap();
        assert!(exact >= partial);
    }

    #[test]
    fn subsequence_requires_every_character_in_order() {
        assert!(subsequence_score("hello world", "hwrld").is_some());
        assert!(subsequence_score("hello world", "dlrow").is_none());
    }

    #[test]
    fn fuzzy_plus_vetoes_candidate_missing_a_long_token() {
        assert!(fuzzy_plus_score("hello there friend", "hello nonexistentword").is_none());
        assert!(fuzzy_plus_score("hello there friend", "hello there").is_some());
    }
}
