//! Canonical deploy names: suffix table and basename sanitization.

use cinedex_model::AssetKind;

/// Canonical suffix for an asset kind at a given 1-based rank, or `None`
/// for kinds with no deploy name. Rank two and up append `rank - 1`:
/// rank 2 becomes `-poster1`, rank 3 `-poster2`.
pub fn suffix_for(kind: AssetKind, rank: i32) -> Option<String> {
    let base = match kind {
        AssetKind::Poster => "-poster",
        AssetKind::Fanart => "-fanart",
        AssetKind::Banner => "-banner",
        AssetKind::Clearlogo => "-clearlogo",
        AssetKind::Clearart => "-clearart",
        AssetKind::Discart => "-disc",
        AssetKind::Landscape => "-landscape",
        AssetKind::Characterart => "-characterart",
        AssetKind::Trailer => "-trailer",
        // No canonical deploy name; writing "-<kind>" could collide with
        // user files, so these are skipped.
        AssetKind::Subtitle | AssetKind::Keyart | AssetKind::Thumb => return None,
    };
    if rank >= 2 {
        Some(format!("{base}{}", rank - 1))
    } else {
        Some(base.to_string())
    }
}

/// Sanitize a name for use in deploy filenames: take the filename portion
/// only, keep `[A-Za-z0-9 _\-().]`, replace everything else with `_`, and
/// strip any `..` sequences.
pub fn sanitize_basename(raw: &str) -> String {
    let filename = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);
    let mut cleaned: String = filename
        .chars()
        .map(|ch| match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | ' ' | '_' | '-' | '(' | ')' | '.' => ch,
            _ => '_',
        })
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_follow_the_canonical_table() {
        assert_eq!(suffix_for(AssetKind::Poster, 1).as_deref(), Some("-poster"));
        assert_eq!(suffix_for(AssetKind::Fanart, 1).as_deref(), Some("-fanart"));
        assert_eq!(suffix_for(AssetKind::Banner, 1).as_deref(), Some("-banner"));
        assert_eq!(
            suffix_for(AssetKind::Clearlogo, 1).as_deref(),
            Some("-clearlogo")
        );
        assert_eq!(
            suffix_for(AssetKind::Clearart, 1).as_deref(),
            Some("-clearart")
        );
        assert_eq!(suffix_for(AssetKind::Discart, 1).as_deref(), Some("-disc"));
        assert_eq!(
            suffix_for(AssetKind::Landscape, 1).as_deref(),
            Some("-landscape")
        );
        assert_eq!(
            suffix_for(AssetKind::Characterart, 1).as_deref(),
            Some("-characterart")
        );
        assert_eq!(
            suffix_for(AssetKind::Trailer, 1).as_deref(),
            Some("-trailer")
        );
    }

    #[test]
    fn ranked_suffixes_append_rank_minus_one() {
        assert_eq!(suffix_for(AssetKind::Poster, 2).as_deref(), Some("-poster1"));
        assert_eq!(suffix_for(AssetKind::Poster, 3).as_deref(), Some("-poster2"));
        assert_eq!(suffix_for(AssetKind::Fanart, 2).as_deref(), Some("-fanart1"));
    }

    #[test]
    fn unmapped_kinds_have_no_suffix() {
        assert_eq!(suffix_for(AssetKind::Keyart, 1), None);
        assert_eq!(suffix_for(AssetKind::Thumb, 1), None);
        assert_eq!(suffix_for(AssetKind::Subtitle, 1), None);
    }

    #[test]
    fn sanitization_keeps_the_allowed_set() {
        assert_eq!(
            sanitize_basename("Inception (2010) [1080p]"),
            "Inception (2010) _1080p_"
        );
        assert_eq!(sanitize_basename("Amélie"), "Am_lie");
        assert_eq!(sanitize_basename("weird:name?"), "weird_name_");
    }

    #[test]
    fn sanitization_strips_paths_and_dotdot() {
        assert_eq!(sanitize_basename("/etc/passwd"), "passwd");
        assert_eq!(sanitize_basename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_basename("a..b..c"), "a.b.c");
    }
}
