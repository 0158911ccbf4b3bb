use std::path::Path;

/// Write a file atomically: temp file in the same directory, then rename.
///
/// The rename is the commit point — a crash mid-write leaves the previous
/// content intact, never a truncated file.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// Split a "From" value like `Jane Doe <jane@customer.com>` into
/// (display name, address). Bare addresses yield the address for both.
pub fn parse_sender(from_field: &str) -> (String, String) {
    let trimmed = from_field.trim();
    if let Some(lt) = trimmed.find('<') {
        if let Some(gt) = trimmed.rfind('>') {
            if gt > lt {
                let email = trimmed[lt + 1..gt].trim().to_string();
                let name = trimmed[..lt].trim().trim_matches('"').trim().to_string();
                if name.is_empty() {
                    return (email.clone(), email);
                }
                return (name, email);
            }
        }
    }
    (trimmed.to_string(), trimmed.to_string())
}

/// Extract the bare address from a "From" value, lowercased.
pub fn extract_email_address(from_field: &str) -> String {
    parse_sender(from_field).1.to_lowercase()
}

/// First word of a display name, for greeting personalization.
/// Falls back to "there" so templates never render an empty greeting.
pub fn first_name(display_name: &str) -> &str {
    display_name
        .split_whitespace()
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("there")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        atomic_write_str(&path, "first").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        atomic_write_str(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        // No stray temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_parse_sender_angle_brackets() {
        let (name, email) = parse_sender("Jane Doe <jane@customer.com>");
        assert_eq!(name, "Jane Doe");
        assert_eq!(email, "jane@customer.com");
    }

    #[test]
    fn test_parse_sender_quoted_name() {
        let (name, email) = parse_sender("\"Doe, Jane\" <jane@customer.com>");
        assert_eq!(name, "Doe, Jane");
        assert_eq!(email, "jane@customer.com");
    }

    #[test]
    fn test_parse_sender_bare_address() {
        let (name, email) = parse_sender("jane@customer.com");
        assert_eq!(name, "jane@customer.com");
        assert_eq!(email, "jane@customer.com");
    }

    #[test]
    fn test_extract_email_address_lowercases() {
        assert_eq!(
            extract_email_address("Jane <JANE@Customer.COM>"),
            "jane@customer.com"
        );
    }

    #[test]
    fn test_first_name() {
        assert_eq!(first_name("Jane Doe"), "Jane");
        assert_eq!(first_name("Jane"), "Jane");
        assert_eq!(first_name(""), "there");
        assert_eq!(first_name("   "), "there");
    }
}
