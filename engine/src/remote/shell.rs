//! Shell quoting helpers

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Quote a value with single-quote semantics: no expansion of any kind
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Quote a value with double-quote semantics: `$VAR` expansion is preserved
pub fn double_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' | '`' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Quote a single argv element only when it needs it
pub fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        quote(arg)
    }
}

/// Join argv into a single shell command line
pub fn join_argv<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command writing `contents` to `path` without any escaping concerns
pub fn write_file(path: &str, contents: &str) -> String {
    let encoded = STANDARD.encode(contents.as_bytes());
    format!(
        "echo '{}' | base64 -d | tee {} > /dev/null",
        encoded,
        quote_arg(path)
    )
}
