//! Quoting for values placed into generated bash.

/// `value` as one double-quoted bash word, taken literally.
pub fn double_quoted(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// `value` as one single-quoted bash word.
pub fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_quoting_escapes_expansions() {
        assert_eq!(double_quoted("plain"), r#""plain""#);
        assert_eq!(double_quoted(r#"say \"hi\""#), r#""say \\\"hi\\\"""#);
        assert_eq!(double_quoted("$HOME `id`"), r#""\$HOME \`id\`""#);
    }

    #[test]
    fn single_quoting_closes_and_reopens() {
        assert_eq!(single_quoted("it's"), r#"'it'"'"'s'"#);
    }

    #[cfg(unix)]
    #[test]
    fn bash_reads_back_the_original_value() {
        let value = r#"{"prompt":"say \"hi\" to $USER `now`","path":"C:\\models"}"#;
        for quoted in [double_quoted(value), single_quoted(value)] {
            let out = std::process::Command::new("bash")
                .arg("-c")
                .arg(format!("printf '%s' {quoted}"))
                .output()
                .unwrap();
            assert_eq!(String::from_utf8(out.stdout).unwrap(), value);
        }
    }
}
