//! Locating and reading spec text, including specs embedded in the block
//! comments of a C/C++ source file.

use cppan_types::ProjectSpec;

/// Extracts the contents of every `/* ... */` block comment, in order.
/// Unterminated trailing comments are ignored.
pub fn extract_comments(source: &str) -> Vec<String> {
    let mut comments = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("/*") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("*/") else {
            break;
        };
        comments.push(after[..end].to_owned());
        rest = &after[end + 2..];
    }
    comments
}

/// Reads a spec out of the comments of a source file. Every comment is
/// tried; a comment that defines `files`, `dependencies` or `local_settings`
/// is taken as authoritative, otherwise the first one that parses at all
/// wins.
pub(crate) fn spec_from_comments(source: &str) -> Option<ProjectSpec> {
    let mut fallback = None;
    for comment in extract_comments(source) {
        let Ok(spec) = ProjectSpec::from_yaml_str(comment.trim()) else {
            continue;
        };
        let probably_this = spec.root.files.is_some()
            || !spec.root.dependencies.entries().is_empty()
            || spec.local_settings.is_some();
        if probably_this {
            return Some(spec);
        }
        fallback.get_or_insert(spec);
    }
    fallback
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_block_comments() {
        let src = "/* first */ int x; /* second\nline */ /* unterminated";
        assert_eq!(extract_comments(src), [" first ", " second\nline "]);
    }

    #[test]
    fn prefers_comments_with_spec_keys() {
        let src = r#"
/*
just a license header
*/
/*
dependencies:
  org.foo.bar: "1"
*/
int main() {}
"#;
        let spec = spec_from_comments(src).unwrap();
        assert_eq!(spec.root.dependencies.entries().len(), 1);
    }

    #[test]
    fn falls_back_to_first_parsable_comment() {
        let src = "/* version: 1.2.3 */ int main() {}";
        let spec = spec_from_comments(src).unwrap();
        assert_eq!(
            spec.root.version,
            Some(cppan_types::Version::number(1, 2, 3))
        );
    }
}
