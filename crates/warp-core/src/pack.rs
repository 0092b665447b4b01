//! The pack encoding: an ordered sequence of strings in one string.
//!
//! Packs use a single reserved separator (`,`) and an escape byte
//! (`$`): `$$` encodes a literal `$` and `$,` a literal `,`. The
//! encoding is deterministic and invertible, so `nth`, `items` and
//! `split` can parse what `pack` produced.

/// Separator between packed items.
pub const PACK_SEPARATOR: char = ',';

/// Escape character inside packed items.
pub const PACK_ESCAPE: char = '$';

/// Escapes one item for inclusion in a pack.
#[must_use]
pub fn escape(item: &str) -> String {
    let mut out = String::with_capacity(item.len());
    for c in item.chars() {
        match c {
            PACK_ESCAPE => out.push_str("$$"),
            PACK_SEPARATOR => out.push_str("$,"),
            other => out.push(other),
        }
    }
    out
}

/// Joins items into a pack string.
#[must_use]
pub fn pack<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> String {
    items
        .into_iter()
        .map(|item| escape(item.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a pack string back into its items.
#[must_use]
pub fn unpack(packed: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = packed.chars();
    while let Some(c) = chars.next() {
        match c {
            PACK_ESCAPE => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push(PACK_ESCAPE),
            },
            PACK_SEPARATOR => {
                items.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    items.push(current);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let items = ["plain", "with,comma", "with$dollar", ""];
        let packed = pack(items);
        assert_eq!(unpack(&packed), items);
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape("a,b"), "a$,b");
        assert_eq!(escape("a$b"), "a$$b");
        assert_eq!(pack(["a", "b"]), "a,b");
    }

    #[test]
    fn test_empty_pack_is_single_empty_item() {
        assert_eq!(unpack(""), vec![String::new()]);
    }
}
