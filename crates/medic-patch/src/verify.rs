//! Post-apply syntax verification for shadow files
//!
//! Verification runs against shadow content before anything touches the
//! real files. Structured formats get a real parser round-trip; code files
//! get a string-aware delimiter balance scan, which catches the truncated
//! or mis-spliced output an automated patch is most likely to produce.
//! File types without a verifier pass by default.

use medic_core::{MedicError, Result};
use std::path::Path;

// Comment and string conventions for the balance scan
#[derive(Clone, Copy)]
struct LangStyle {
    hash_comments: bool,
    slash_comments: bool,
    single_quote_strings: bool,
}

const PYTHON: LangStyle = LangStyle {
    hash_comments: true,
    slash_comments: false,
    single_quote_strings: true,
};

const SCRIPT: LangStyle = LangStyle {
    hash_comments: false,
    slash_comments: true,
    single_quote_strings: true,
};

const CURLY: LangStyle = LangStyle {
    hash_comments: false,
    slash_comments: true,
    single_quote_strings: false,
};

/// Verify `content` for the file type implied by `path`'s extension
pub fn verify_syntax(path: &Path, content: &str) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let result = match ext.as_str() {
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {}", e)),
        "toml" => toml::from_str::<toml::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid TOML: {}", e)),
        "py" => check_balanced(content, PYTHON),
        "js" | "ts" => check_balanced(content, SCRIPT),
        "rs" | "c" | "cpp" | "h" | "go" | "java" => check_balanced(content, CURLY),
        _ => Ok(()),
    };

    result.map_err(|msg| MedicError::Patch(format!("Verification failed for {:?}: {}", path, msg)))
}

// Delimiter balance scan that skips string literals and line comments.
// Strings are tracked within one line only; a quote still open at end of
// line is tolerated (triple-quoted and raw strings make it ambiguous).
fn check_balanced(content: &str, style: LangStyle) -> std::result::Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        let mut in_string: Option<char> = None;
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];

            if let Some(quote) = in_string {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == quote {
                    in_string = None;
                }
                i += 1;
                continue;
            }

            match c {
                '"' => in_string = Some('"'),
                '\'' if style.single_quote_strings => in_string = Some('\''),
                '\'' => {
                    // Char literal ('x' or '\n') or a lifetime; either way
                    // nothing inside counts toward balance.
                    if i + 2 < chars.len() && chars[i + 1] == '\\' && chars[i + 3..].first() == Some(&'\'') {
                        i += 4;
                        continue;
                    }
                    if i + 2 < chars.len() && chars[i + 2] == '\'' {
                        i += 3;
                        continue;
                    }
                }
                '#' if style.hash_comments => break,
                '/' if style.slash_comments && chars.get(i + 1) == Some(&'/') => break,
                '(' | '[' | '{' => stack.push((c, line_no + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Err(format!(
                                "mismatched {:?} at line {} (open {:?} from line {})",
                                c,
                                line_no + 1,
                                open,
                                at
                            ));
                        }
                        None => {
                            return Err(format!("unmatched {:?} at line {}", c, line_no + 1));
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    if let Some((open, at)) = stack.pop() {
        return Err(format!("unclosed {:?} from line {}", open, at));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn test_valid_json_passes() {
        assert!(verify_syntax(&path("config.json"), r#"{"k": [1, 2]}"#).is_ok());
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(verify_syntax(&path("config.json"), r#"{"k": "#).is_err());
    }

    #[test]
    fn test_valid_toml_passes() {
        assert!(verify_syntax(&path("settings.toml"), "a = 1\n[b]\nc = \"x\"\n").is_ok());
    }

    #[test]
    fn test_invalid_toml_fails() {
        assert!(verify_syntax(&path("settings.toml"), "a = = 1\n").is_err());
    }

    #[test]
    fn test_balanced_python_passes() {
        let code = "def f(x):\n    return {'k': [x, 1]}\n";
        assert!(verify_syntax(&path("train.py"), code).is_ok());
    }

    #[test]
    fn test_unclosed_brace_fails() {
        let code = "def f(x):\n    return {'k': [x, 1]\n";
        assert!(verify_syntax(&path("train.py"), code).is_err());
    }

    #[test]
    fn test_mismatched_delimiters_fail() {
        assert!(verify_syntax(&path("main.rs"), "fn f() -> i32 { (1] }\n").is_err());
    }

    #[test]
    fn test_delimiters_inside_strings_ignored() {
        let code = "msg = \"unbalanced ) ] }\"\nprint(msg)\n";
        assert!(verify_syntax(&path("train.py"), code).is_ok());
    }

    #[test]
    fn test_delimiters_inside_comments_ignored() {
        assert!(verify_syntax(&path("train.py"), "x = 1  # note: )]}}\n").is_ok());
        assert!(verify_syntax(&path("main.rs"), "let x = 1; // note: )]}}\n").is_ok());
    }

    #[test]
    fn test_rust_lifetimes_and_char_literals_pass() {
        let code = "fn f<'a>(x: &'a str) -> char {\n    let c = '(';\n    c\n}\n";
        assert!(verify_syntax(&path("main.rs"), code).is_ok());
    }

    #[test]
    fn test_unknown_extension_passes() {
        assert!(verify_syntax(&path("notes.txt"), "((((").is_ok());
    }
}
