/// Convert a ticker into a filesystem-safe file stem.
pub fn symbol_file_slug(symbol: &str) -> String {
    let mut slug = String::with_capacity(symbol.len());

    for ch in symbol.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
            slug.push(ch.to_ascii_lowercase());
        } else if matches!(ch, '.' | ' ' | '^' | '/') {
            slug.push('_');
        }
    }

    if slug.is_empty() {
        "_".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_and_path_safe() {
        assert_eq!(symbol_file_slug("7203"), "7203");
        assert_eq!(symbol_file_slug("BRK.B"), "brk_b");
        assert_eq!(symbol_file_slug("^SPX"), "_spx");
        assert_eq!(symbol_file_slug("../etc"), "___etc");
        assert_eq!(symbol_file_slug("  "), "_");
    }
}
