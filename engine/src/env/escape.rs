//! Value escaping for environment variables

use crate::env::set::Quoting;
use crate::remote::shell;

/// Strip surrounding quote characters users paste around literal values
pub fn strip_outer_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '\'' || c == '"')
}

/// Escape a value for a shell or `.env` file
pub fn escape_value(value: &str, quoting: Quoting) -> String {
    match quoting {
        Quoting::Literal => shell::quote(strip_outer_quotes(value)),
        Quoting::Interpolated => shell::double_quote(value),
    }
}
