use std::cmp::Ordering;
use std::fmt;

/// Catalog version token such as `v20190429`, `20190429` or `v1`.
///
/// Ordering strips one leading `v`, compares purely numeric remainders as
/// integers and everything else lexically. Numeric tokens rank above
/// non-numeric ones, so a dated release always beats a free-form label.
#[derive(Debug, Clone)]
pub struct VersionToken {
    raw: String,
}

impl VersionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn body(&self) -> &str {
        let trimmed = self.raw.trim();
        trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed)
    }

    fn numeric(&self) -> Option<&str> {
        let body = self.body();
        if !body.is_empty() && body.chars().all(|ch| ch.is_ascii_digit()) {
            Some(body.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            // digit strings without leading zeros: longer is larger
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.body().cmp(other.body()),
        }
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionToken {}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latest<'a>(tokens: &[&'a str]) -> &'a str {
        tokens
            .iter()
            .max_by(|a, b| VersionToken::new(**a).cmp(&VersionToken::new(**b)))
            .copied()
            .unwrap()
    }

    #[test]
    fn dated_versions_beat_short_ones() {
        assert_eq!(latest(&["v1", "v20240101", "v20230101"]), "v20240101");
    }

    #[test]
    fn numeric_not_lexical() {
        assert!(VersionToken::new("v9") < VersionToken::new("v10"));
        assert!(VersionToken::new("v010") > VersionToken::new("v9"));
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(
            VersionToken::new("20190429").cmp(&VersionToken::new("v20190429")),
            Ordering::Equal
        );
    }

    #[test]
    fn text_ranks_below_numbers() {
        assert!(VersionToken::new("latest") < VersionToken::new("v1"));
        assert!(VersionToken::new("va") < VersionToken::new("vb"));
    }
}
