//! Small helpers for assembling SQL text.
//!
//! Statements are built as `(text, parameters)` pairs and composed by
//! concatenation; values never enter the text, only `?` placeholders do.

/// Quote an identifier. Column names may contain dots.
pub fn quote(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

/// Quote and comma-join identifiers.
pub fn quote_list<'a>(idents: impl IntoIterator<Item = &'a str>) -> String {
  idents.into_iter().map(quote).collect::<Vec<_>>().join(", ")
}

/// Indent every non-empty line by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
  let pad = " ".repeat(width);
  text
    .split_inclusive('\n')
    .map(|line| {
      if line.trim().is_empty() {
        line.to_owned()
      } else {
        format!("{pad}{line}")
      }
    })
    .collect()
}

/// A `(?, ?, ...)` tuple of `arity` placeholders.
pub fn placeholders(arity: usize) -> String {
  format!("({})", vec!["?"; arity].join(", "))
}

/// A `VALUES`-backed select yielding `rows` tuples named after `fields`.
/// `rows` must be non-zero: SQL has no empty `VALUES` list.
pub fn values_select(fields: &[&str], rows: usize) -> String {
  let columns = fields
    .iter()
    .enumerate()
    .map(|(i, f)| format!("column{} AS {}", i + 1, quote(f)))
    .collect::<Vec<_>>()
    .join(", ");
  let tuple = format!("    {}", placeholders(fields.len()));
  format!(
    "SELECT {columns} FROM (VALUES\n{}\n)\n",
    vec![tuple; rows].join(",\n")
  )
}
