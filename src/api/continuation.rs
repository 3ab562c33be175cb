// Pagination cursor carried in the `Link` response header, e.g. `</kv?after=10>;rel="next"`.
use crate::pipeline::HeaderLookup;
use bstr::ByteSlice;

pub const LINK_HEADER: &[u8] = b"Link";
pub const AFTER_MARKER: &[u8] = b"?after=";

/// Cursor for the next page, or `None` when the header, the marker or the number is missing.
pub fn next_after<H: HeaderLookup + ?Sized>(headers: &H) -> Option<u64> {
    parse_after(headers.header(LINK_HEADER)?)
}

/// Digits following `?after=` in a `Link` header value.
pub fn parse_after(value: &[u8]) -> Option<u64> {
    let start = value.find(AFTER_MARKER)? + AFTER_MARKER.len();
    let rest = &value[start..];
    let end = rest
        .iter()
        .position(|byte| !byte.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    rest[..end].to_str().ok()?.parse().ok()
}
