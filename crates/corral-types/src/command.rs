//! Tokenizer for the raw command strings stored in server definitions.
//!
//! Tokens are split on unquoted spaces. A `"` toggles quoting and is kept
//! verbatim in the token, so `--name "My Server"` yields the two tokens
//! `--name` and `"My Server"`. Consecutive unquoted spaces produce empty
//! tokens; only a trailing blank token is dropped.

/// Split a command string into program and argument tokens.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in command.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ' ' if !quoted => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_quotes_and_quoted_spaces() {
        assert_eq!(
            tokenize(r#"run --name "My Server" --verbose"#),
            vec!["run", "--name", "\"My Server\"", "--verbose"]
        );
    }

    #[test]
    fn simple_command() {
        assert_eq!(tokenize("java -Xmx2G -jar server.jar"), vec![
            "java", "-Xmx2G", "-jar", "server.jar"
        ]);
    }

    #[test]
    fn trailing_blank_token_dropped() {
        assert_eq!(tokenize("echo hi "), vec!["echo", "hi"]);
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").iter().all(String::is_empty));
    }

    #[test]
    fn double_space_yields_empty_token() {
        assert_eq!(tokenize("a  b"), vec!["a", "", "b"]);
    }

    #[test]
    fn unterminated_quote_swallows_rest() {
        assert_eq!(tokenize(r#"say "hello world"#), vec!["say", "\"hello world"]);
    }
}
