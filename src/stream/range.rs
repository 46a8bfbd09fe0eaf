//! HTTP Range parsing shared by every streaming endpoint.

use serde::Serialize;

/// An inclusive byte range already clamped to the source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero since the range is inclusive.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("unsatisfiable range")]
    Unsatisfiable,
}

/// Parse a `Range` header against a source of `size` bytes. `None` means
/// "no range requested" (serve the whole body with 200).
pub fn parse_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, RangeError> {
    let Some(header) = header else {
        return Ok(None);
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        // Unknown unit: ignore the header per RFC 9110.
        return Ok(None);
    };
    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }

    // Only the first range of a multi-range request is honoured.
    let first = spec.split(',').next().unwrap_or("").trim();
    let Some((start_s, end_s)) = first.split_once('-') else {
        return Err(RangeError::Unsatisfiable);
    };

    let range = match (start_s.is_empty(), end_s.is_empty()) {
        // "-500": final 500 bytes
        (true, false) => {
            let suffix: u64 = end_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
            if suffix == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            let start = size.saturating_sub(suffix);
            ByteRange { start, end: size - 1 }
        }
        // "500-": from offset to the end
        (false, true) => {
            let start: u64 = start_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
            if start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            ByteRange { start, end: size - 1 }
        }
        // "a-b"
        (false, false) => {
            let start: u64 = start_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
            let end: u64 = end_s.parse().map_err(|_| RangeError::Unsatisfiable)?;
            if start > end || start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            ByteRange {
                start,
                end: end.min(size - 1),
            }
        }
        (true, true) => return Err(RangeError::Unsatisfiable),
    };
    Ok(Some(range))
}

/// Content type for a media path, biased to the streaming containers.
pub fn content_type_for(path: &str) -> String {
    let lower = path.to_lowercase();
    if lower.ends_with(".mkv") {
        return "video/x-matroska".to_string();
    }
    if lower.ends_with(".m2ts") || lower.ends_with(".ts") {
        return "video/mp2t".to_string();
    }
    if lower.ends_with(".m3u8") {
        return "application/vnd.apple.mpegurl".to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range() {
        let r = parse_range(Some("bytes=0-1023"), 4096).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 1023 });
        assert_eq!(r.len(), 1024);
        assert_eq!(r.content_range(4096), "bytes 0-1023/4096");
    }

    #[test]
    fn test_open_ended_range() {
        let r = parse_range(Some("bytes=100-"), 200).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 100, end: 199 });
    }

    #[test]
    fn test_suffix_range() {
        let r = parse_range(Some("bytes=-50"), 200).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 150, end: 199 });
    }

    #[test]
    fn test_end_clamped_to_size() {
        let r = parse_range(Some("bytes=0-999999"), 100).unwrap().unwrap();
        assert_eq!(r.end, 99);
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(
            parse_range(Some("bytes=500-"), 100),
            Err(RangeError::Unsatisfiable)
        );
        assert_eq!(
            parse_range(Some("bytes=5-2"), 100),
            Err(RangeError::Unsatisfiable)
        );
    }

    #[test]
    fn test_no_header() {
        assert_eq!(parse_range(None, 100), Ok(None));
    }

    #[test]
    fn test_every_valid_subrange_shape() {
        // Range correctness: for 0 <= a <= b < size the parse result is
        // exactly [a, b].
        let size = 32;
        for a in 0..size {
            for b in a..size {
                let header = format!("bytes={a}-{b}");
                let r = parse_range(Some(&header), size as u64).unwrap().unwrap();
                assert_eq!((r.start, r.end), (a as u64, b as u64));
            }
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("/a/b.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("/a/b.mp4"), "video/mp4");
        assert_eq!(content_type_for("/a/b.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("/a/seg.ts"), "video/mp2t");
    }
}
