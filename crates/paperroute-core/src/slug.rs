//! Canonical slugs used as path segments.
//!
//! A slug is lowercase, restricted to `[a-z0-9-]`, and never starts or ends
//! with a hyphen.

/// Upper bound on slug length so generated file names stay well below
/// common filesystem limits.
pub const MAX_SLUG_LEN: usize = 80;

/// Check whether a value already satisfies the slug format.
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Mechanically correct a value into slug form.
///
/// Case-folds, folds common Latin diacritics to ASCII, replaces every other
/// disallowed character with a hyphen, collapses repeated hyphens and strips
/// them from both ends. The result is truncated to [`MAX_SLUG_LEN`] on a
/// hyphen boundary where possible. May return an empty string when the
/// input contains nothing usable.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_hyphen = false;

    for c in value.chars().flat_map(char::to_lowercase) {
        let folded = fold_char(c);
        if folded.is_empty() {
            pending_hyphen = true;
            continue;
        }
        for f in folded.chars() {
            if f.is_ascii_lowercase() || f.is_ascii_digit() {
                if pending_hyphen && !out.is_empty() {
                    out.push('-');
                }
                pending_hyphen = false;
                out.push(f);
            } else {
                pending_hyphen = true;
            }
        }
    }

    truncate(out, MAX_SLUG_LEN)
}

fn truncate(slug: String, max_len: usize) -> String {
    if slug.len() <= max_len {
        return slug;
    }
    let cut = &slug[..max_len];
    let cut = match cut.rfind('-') {
        Some(idx) if idx > max_len / 2 => &cut[..idx],
        _ => cut,
    };
    cut.trim_end_matches('-').to_string()
}

/// Map a lowercase character to its ASCII replacement. Returns an empty
/// string for characters that should become a separator.
fn fold_char(c: char) -> &'static str {
    match c {
        'a'..='z' | '0'..='9' => ascii_str(c),
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ą' | 'ā' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ę' | 'ě' | 'ē' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'ł' | 'ľ' | 'ĺ' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ő' | 'ō' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ů' | 'ű' | 'ū' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => "",
    }
}

fn ascii_str(c: char) -> &'static str {
    const TABLE: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
    match TABLE.find(c) {
        Some(idx) => &TABLE[idx..idx + 1],
        None => "",
    }
}
