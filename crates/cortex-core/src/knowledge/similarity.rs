//! Entity-token extraction and Jaccard similarity used by `autoLink` when no
//! `Embedder` is configured.

use std::collections::HashSet;

/// Extracts candidate entity tokens from free text: capitalized phrases,
/// quoted strings, and camelCase identifiers, each longer than 2 characters.
pub fn extract_entity_tokens(text: &str) -> Vec<String> {
    let mut tokens: HashSet<String> = HashSet::new();

    for quoted in extract_quoted(text) {
        if quoted.len() > 2 {
            tokens.insert(quoted);
        }
    }

    for word in text.split_whitespace() {
        let trimmed: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if trimmed.len() <= 2 {
            continue;
        }
        let starts_capital = trimmed.chars().next().map(char::is_uppercase).unwrap_or(false);
        let is_camel_case = trimmed.chars().any(char::is_uppercase) && trimmed.chars().any(char::is_lowercase) && !starts_capital;
        if starts_capital || is_camel_case {
            tokens.insert(trimmed);
        }
    }

    let mut out: Vec<String> = tokens.into_iter().collect();
    out.sort();
    out
}

fn extract_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' || c == '\'' {
            let quote = c;
            let mut buf = String::new();
            for inner in chars.by_ref() {
                if inner == quote {
                    break;
                }
                buf.push(inner);
            }
            if !buf.is_empty() {
                out.push(buf);
            }
        }
    }
    out
}

/// Jaccard similarity over lowercase whitespace tokens of two facts, the
/// fallback similarity metric when no `Embedder` is configured.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(|s| s.to_lowercase()).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(|s| s.to_lowercase()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_capitalized_and_quoted_tokens() {
        let tokens = extract_entity_tokens(r#"Alpha said "Project Nebula" was ready"#);
        assert!(tokens.contains(&"Alpha".to_string()));
        assert!(tokens.contains(&"Project Nebula".to_string()));
    }

    #[test]
    fn jaccard_identical_facts_is_one() {
        let sim = jaccard_similarity("the sky is blue", "the sky is blue");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_disjoint_facts_is_zero() {
        let sim = jaccard_similarity("alpha beta", "gamma delta");
        assert_eq!(sim, 0.0);
    }
}
