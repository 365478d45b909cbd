// SPDX-License-Identifier: Apache-2.0

use ramdata_core::ErrorCode;

use crate::error::ModelError;

/// Longest escaped path component most filesystems and object stores
/// accept.
pub const MAX_NAME_COMPONENT_BYTES: usize = 255;

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b' '
}

/// Escapes a user-facing name into a single storage path component.
///
/// Bytes outside `[A-Za-z0-9_- ]` become `%XX`, which keeps the
/// encoding injective and keeps every escaped name free of `.` so it
/// can never collide with `.lock`, `.completed` or `.zattrs` siblings.
/// A leading `_` is escaped too, reserving `__name__` folders for
/// internal use.
pub fn escape_name(name: &str) -> Result<String, ModelError> {
    if name.is_empty() {
        return Err(ModelError::new(ErrorCode::InvalidName, "name must not be empty"));
    }
    let mut out = String::with_capacity(name.len());
    for (i, b) in name.bytes().enumerate() {
        if is_plain(b) && !(i == 0 && b == b'_') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    if out.len() > MAX_NAME_COMPONENT_BYTES {
        return Err(ModelError::new(
            ErrorCode::InvalidName,
            format!(
                "escaped name is {} bytes, exceeding the {MAX_NAME_COMPONENT_BYTES}-byte path component budget",
                out.len()
            ),
        ));
    }
    Ok(out)
}

pub fn unescape_name(escaped: &str) -> Result<String, ModelError> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3).ok_or_else(|| {
                ModelError::new(ErrorCode::InvalidName, format!("truncated escape in `{escaped}`"))
            })?;
            let b = u8::from_str_radix(hex, 16).map_err(|_| {
                ModelError::new(ErrorCode::InvalidName, format!("bad escape `%{hex}` in `{escaped}`"))
            })?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| ModelError::new(ErrorCode::InvalidName, format!("escaped name is not utf-8: {e}")))
}

/// Rejects `escaped` when it differs from an existing escaped name only
/// by letter case, which would alias on case-insensitive filesystems.
pub fn check_name_collision<'a, I>(existing: I, escaped: &str) -> Result<(), ModelError>
where
    I: IntoIterator<Item = &'a str>,
{
    for other in existing {
        if other != escaped && other.eq_ignore_ascii_case(escaped) {
            return Err(ModelError::new(
                ErrorCode::InvalidName,
                format!("`{escaped}` collides with existing `{other}` on case-insensitive storage"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{check_name_collision, escape_name, unescape_name};
    use ramdata_core::ErrorCode;

    #[test]
    fn path_characters_are_escaped() {
        assert_eq!(escape_name("n_counts").expect("plain"), "n_counts");
        assert_eq!(escape_name("a/b").expect("slash"), "a%2Fb");
        assert_eq!(escape_name("x.lock").expect("dot"), "x%2Elock");
        assert_eq!(escape_name("__mapping__").expect("reserved"), "%5F_mapping__");
        assert_eq!(escape_name("100%").expect("percent"), "100%25");
    }

    #[test]
    fn unescape_reverses_escape() {
        for name in ["a/b", "é cell", "..", "_x", "%41"] {
            let escaped = escape_name(name).expect("escape");
            assert_eq!(unescape_name(&escaped).expect("unescape"), name);
        }
    }

    #[test]
    fn overlong_names_are_rejected() {
        let err = escape_name(&"/".repeat(100)).expect_err("too long");
        assert_eq!(err.code, ErrorCode::InvalidName);
    }

    #[test]
    fn case_only_collisions_are_rejected() {
        assert!(check_name_collision(["Gene"], "gene").is_err());
        assert!(check_name_collision(["gene"], "gene").is_ok());
    }
}
