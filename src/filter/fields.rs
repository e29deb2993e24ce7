//! Compiles `--fields a,b.c` into an equivalent filter expression.

use crate::error::{Error, Result};

fn is_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// A dot-separated path of identifier segments.
fn is_field_path(field: &str) -> bool {
    field.split('.').all(is_segment)
}

/// Splits and validates a comma-separated field list.
///
/// Blank entries are skipped and duplicates keep their first position.
///
/// ```
/// use instantly::filter::parse_fields;
///
/// assert_eq!(parse_fields("a, b.c ,a").unwrap(), vec!["a", "b.c"]);
/// assert!(parse_fields("a.-b").is_err());
/// ```
pub fn parse_fields(input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::FieldGrammar("empty --fields".to_string()));
    }
    let mut fields: Vec<String> = Vec::new();
    for field in input.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        if !is_field_path(field) {
            return Err(Error::FieldGrammar(format!(
                "invalid field {field:?} (expected: a, a_b, a.b, a.b_c)"
            )));
        }
        if !fields.iter().any(|seen| seen == field) {
            fields.push(field.to_string());
        }
    }
    if fields.is_empty() {
        return Err(Error::FieldGrammar("no valid fields in --fields".to_string()));
    }
    Ok(fields)
}

/// `{ a: .a, c: .b.c }`: each field keyed by its last segment.
pub fn build_object_expr(fields: &[String]) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|field| {
            let key = field.rsplit('.').next().unwrap_or(field);
            format!("{key}: .{field}")
        })
        .collect();
    format!("{{ {} }}", parts.join(", "))
}

/// Projects the fields out of an agent envelope (`items`, `item` or `data`)
/// or out of a raw API response.
pub fn build_fields_query(fields: &[String]) -> String {
    let object = build_object_expr(fields);
    format!(
        r#"
if (type == "object") then
  if (has("kind")) then
    if (has("items") and (.items|type=="array")) then
      {{kind: .kind, meta: .meta, items: [.items[] | {object}]}}
    elif (has("item") and (.item|type=="object")) then
      {{kind: .kind, meta: .meta, item: (.item | {object})}}
    elif (has("data") and (.data|type=="object")) then
      {{kind: .kind, meta: .meta, data: (.data | {object})}}
    else
      {object}
    end
  else
    if (has("items") and (.items|type=="array")) then
      [.items[] | {object}]
    else
      {object}
    end
  end
else
  .
end
"#
    )
}

/// Resolves `--jq` and `--fields` into one expression.
///
/// Returns the free-form expression as given, the compiled field projection,
/// or an empty (identity) expression when neither is set.
pub fn effective_expression(jq: &str, fields: &str) -> Result<String> {
    let has_jq = !jq.trim().is_empty();
    let has_fields = !fields.trim().is_empty();
    match (has_jq, has_fields) {
        (true, true) => Err(Error::ConfigurationError(
            "--jq and --fields cannot be used together".to_string(),
        )),
        (true, false) => Ok(jq.to_string()),
        (false, true) => Ok(build_fields_query(&parse_fields(fields)?)),
        (false, false) => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        assert!(parse_fields("").is_err());
        assert!(parse_fields("a,-b").is_err());
        assert!(parse_fields("1a").is_err());
        assert!(parse_fields("a.").is_err());
        assert_eq!(parse_fields("a,,b").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_fields("a, a.b ,a").unwrap(), vec!["a", "a.b"]);
        assert_eq!(parse_fields("_x.y_2").unwrap(), vec!["_x.y_2"]);
    }

    #[test]
    fn test_parse_fields_messages() {
        assert_eq!(
            parse_fields("  ").unwrap_err().to_string(),
            "empty --fields"
        );
        assert_eq!(
            parse_fields(", ,").unwrap_err().to_string(),
            "no valid fields in --fields"
        );
        assert_eq!(
            parse_fields("a.-b").unwrap_err().to_string(),
            "invalid field \"a.-b\" (expected: a, a_b, a.b, a.b_c)"
        );
    }

    #[test]
    fn test_build_object_expr() {
        let fields = vec!["a".to_string(), "b.c".to_string()];
        assert_eq!(build_object_expr(&fields), "{ a: .a, c: .b.c }");
    }

    #[test]
    fn test_effective_expression() {
        assert!(matches!(
            effective_expression(".", "a"),
            Err(Error::ConfigurationError(_))
        ));
        assert_eq!(effective_expression(".a", "").unwrap(), ".a");
        assert_eq!(effective_expression("", " ").unwrap(), "");
        assert!(effective_expression("", "a,b,b").unwrap().contains("items"));
        assert!(matches!(
            effective_expression("", "a.-b"),
            Err(Error::FieldGrammar(_))
        ));
    }
}
