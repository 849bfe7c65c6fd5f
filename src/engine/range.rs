//! Byte range requests
//!
//! Parses the `Range` header of a download request. Only single-span requests
//! are understood; anything else is treated as if no header was sent.

use crate::engine::storage::StorageError;

/// A single span from a `Range` header. Either bound may be open.
///
/// `start: None` with `end: Some(n)` is a suffix request for the last `n` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub unit: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RangeRequest {
    pub fn bytes(start: Option<u64>, end: Option<u64>) -> Self {
        Self {
            unit: "bytes".to_string(),
            start,
            end,
        }
    }

    /// Parse a header value such as `bytes=0-99`, `bytes=100-` or `bytes=-500`
    pub fn parse(header: &str) -> Option<Self> {
        let (unit, ranges) = header.trim().split_once('=')?;
        let unit = unit.trim();
        let ranges = ranges.trim();
        if unit.is_empty() || ranges.contains(',') {
            return None;
        }

        let (start, end) = ranges.split_once('-')?;
        let parse_bound = |s: &str| -> Option<Option<u64>> {
            let s = s.trim();
            if s.is_empty() {
                Some(None)
            } else {
                s.parse().ok().map(Some)
            }
        };
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;
        if start.is_none() && end.is_none() {
            return None;
        }

        Some(Self {
            unit: unit.to_string(),
            start,
            end,
        })
    }

    pub fn is_bytes(&self) -> bool {
        self.unit.eq_ignore_ascii_case("bytes")
    }

    /// Inclusive `(first, last)` byte offsets within an object of `total_len` bytes.
    ///
    /// Returns `Ok(None)` when the unit is not `bytes`, which means the request
    /// is served in full.
    pub fn resolve(&self, total_len: u64) -> Result<Option<(u64, u64)>, StorageError> {
        if !self.is_bytes() {
            return Ok(None);
        }

        let unsatisfiable = || StorageError::InvalidRange(format!("{} for length {}", self, total_len));
        if total_len == 0 {
            return Err(unsatisfiable());
        }
        let last = total_len - 1;

        let span = match (self.start, self.end) {
            (Some(start), end) => {
                let end = end.unwrap_or(last).min(last);
                if start > end {
                    return Err(unsatisfiable());
                }
                (start, end)
            }
            (None, Some(suffix)) => {
                if suffix == 0 {
                    return Err(unsatisfiable());
                }
                (total_len.saturating_sub(suffix), last)
            }
            (None, None) => return Err(unsatisfiable()),
        };

        Ok(Some(span))
    }
}

impl std::fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=", self.unit)?;
        if let Some(start) = self.start {
            write!(f, "{}", start)?;
        }
        write!(f, "-")?;
        if let Some(end) = self.end {
            write!(f, "{}", end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(RangeRequest::parse("bytes=0-99"), Some(RangeRequest::bytes(Some(0), Some(99))));
        assert_eq!(RangeRequest::parse("bytes=100-"), Some(RangeRequest::bytes(Some(100), None)));
        assert_eq!(RangeRequest::parse("bytes=-500"), Some(RangeRequest::bytes(None, Some(500))));
        assert_eq!(RangeRequest::parse(" bytes = 5 - 9 "), Some(RangeRequest::bytes(Some(5), Some(9))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(RangeRequest::parse("bytes"), None);
        assert_eq!(RangeRequest::parse("bytes=-"), None);
        assert_eq!(RangeRequest::parse("bytes=a-b"), None);
        assert_eq!(RangeRequest::parse("bytes=0-1,5-9"), None);
        assert_eq!(RangeRequest::parse("=0-1"), None);
    }

    #[test]
    fn test_other_units_are_kept_but_ignored() {
        let range = RangeRequest::parse("items=0-5").unwrap();
        assert_eq!(range.unit, "items");
        assert_eq!(range.resolve(100).unwrap(), None);
    }

    #[test]
    fn test_resolve_clamps_and_suffixes() {
        assert_eq!(RangeRequest::bytes(Some(0), Some(99)).resolve(1000).unwrap(), Some((0, 99)));
        assert_eq!(RangeRequest::bytes(Some(900), Some(5000)).resolve(1000).unwrap(), Some((900, 999)));
        assert_eq!(RangeRequest::bytes(Some(10), None).resolve(1000).unwrap(), Some((10, 999)));
        assert_eq!(RangeRequest::bytes(None, Some(100)).resolve(1000).unwrap(), Some((900, 999)));
        assert_eq!(RangeRequest::bytes(None, Some(5000)).resolve(1000).unwrap(), Some((0, 999)));
    }

    #[test]
    fn test_resolve_unsatisfiable() {
        assert!(RangeRequest::bytes(Some(1000), None).resolve(1000).is_err());
        assert!(RangeRequest::bytes(Some(5), Some(4)).resolve(1000).is_err());
        assert!(RangeRequest::bytes(None, Some(0)).resolve(1000).is_err());
        assert!(RangeRequest::bytes(Some(0), None).resolve(0).is_err());
    }

    #[test]
    fn test_display_round_trips_header() {
        assert_eq!(RangeRequest::bytes(Some(0), Some(99)).to_string(), "bytes=0-99");
        assert_eq!(RangeRequest::bytes(None, Some(7)).to_string(), "bytes=-7");
    }
}
