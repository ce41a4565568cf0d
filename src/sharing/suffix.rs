//! Naming of new shared resources.

use crate::leader::LeaderTracker;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

static VALID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9]{5}$").expect("suffix pattern is valid")
});

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub fn is_valid_suffix(suffix: &str) -> bool {
    VALID_SUFFIX.is_match(suffix)
}

/// Split a comma-separated override list, dropping invalid entries
pub fn parse_suffix_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| is_valid_suffix(s))
        .map(str::to_string)
        .collect()
}

/// Five random lowercase alphanumerics
pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..5)
        .map(|_| char::from(CHARSET[rng.random_range(0..CHARSET.len())]))
        .collect()
}

/// Tracked name for the resource at `path_index`
///
/// Overrides are tried in order: one naming an entry at the same path is shared, one
/// naming nothing yet is claimed, one taken by another path is skipped. Without a usable
/// override, an existing entry at the same path is shared, otherwise a fresh random
/// suffix is drawn.
pub fn choose_name<R: Rng + ?Sized>(
    overrides: &[String],
    tracker: &LeaderTracker,
    path_index: &str,
    rng: &mut R,
) -> String {
    for suffix in overrides.iter().filter(|s| is_valid_suffix(s)) {
        let name = format!("-{suffix}");
        let mut named = tracker.entries.iter().filter(|e| e.name == name).peekable();
        if named.peek().is_none() {
            return name;
        }
        if named.any(|e| e.path_index == path_index) {
            return name;
        }
    }

    if let Some(entry) = tracker.find_by_path_index(path_index) {
        return entry.name.clone();
    }

    loop {
        let name = format!("-{}", random_suffix(rng));
        if !tracker.names().any(|n| n == name) {
            return name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::LeaderEntry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tracker(entries: &[(&str, &str)]) -> LeaderTracker {
        LeaderTracker {
            version: "v1_4_2".to_string(),
            entries: entries
                .iter()
                .map(|(name, index)| LeaderEntry {
                    name: (*name).to_string(),
                    path_index: (*index).to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_suffix_list() {
        assert_eq!(
            parse_suffix_list("abcde, ABCDE,toolong,x1y2z,,"),
            vec!["abcde".to_string(), "x1y2z".to_string()]
        );
    }

    #[test]
    fn test_random_suffix_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(is_valid_suffix(&random_suffix(&mut rng)));
        }
    }

    #[test]
    fn test_unused_override_is_claimed() {
        let mut rng = StdRng::seed_from_u64(1);
        let name = choose_name(&["abcde".to_string()], &tracker(&[]), "v1_4_2.0", &mut rng);
        assert_eq!(name, "-abcde");
    }

    #[test]
    fn test_override_on_other_path_is_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let overrides = vec!["abcde".to_string(), "fghij".to_string()];
        let name = choose_name(&overrides, &tracker(&[("-abcde", "v1_4_2.1")]), "v1_4_2.0", &mut rng);
        assert_eq!(name, "-fghij");
    }

    #[test]
    fn test_override_on_same_path_is_shared() {
        let mut rng = StdRng::seed_from_u64(1);
        let name = choose_name(
            &["abcde".to_string()],
            &tracker(&[("-abcde", "v1_4_2.0")]),
            "v1_4_2.0",
            &mut rng,
        );
        assert_eq!(name, "-abcde");
    }

    #[test]
    fn test_existing_entry_is_shared_without_overrides() {
        let mut rng = StdRng::seed_from_u64(1);
        let name = choose_name(&[], &tracker(&[("-zzzzz", "v1_4_2.0")]), "v1_4_2.0", &mut rng);
        assert_eq!(name, "-zzzzz");
    }

    #[test]
    fn test_random_name_when_nothing_applies() {
        let mut rng = StdRng::seed_from_u64(1);
        let name = choose_name(&[], &tracker(&[("-zzzzz", "v1_4_2.1")]), "v1_4_2.0", &mut rng);
        assert!(name.starts_with('-'));
        assert!(is_valid_suffix(&name[1..]));
        assert_ne!(name, "-zzzzz");
    }
}
