use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{any, take_till};
use winnow::{ModalResult, Parser};

use cgvip_types::{GovernanceError, VariantRecord};
use serde_json::Value;

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

// ---------------------------------------------------------------------------
// Grammar
//
//   table  = row ( eol row )* eol?
//   row    = field ( ',' field )*
//   field  = quoted | bare
//   quoted = '"' ( [^"] | '""' )* '"'
//   bare   = [^,\r\n]*
// ---------------------------------------------------------------------------

/// Parse a double-quoted field; `""` inside the quotes is a literal quote.
/// Newlines and commas inside the quotes are kept verbatim.
fn quoted_field(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = any
            .parse_next(input)
            .map_err(|_: ErrMode<ContextError>| make_cut_error("closing quote"))?;
        if c == '"' {
            if input.starts_with('"') {
                let _ = any.parse_next(input)?;
                s.push('"');
            } else {
                break;
            }
        } else {
            s.push(c);
        }
    }
    if !(input.is_empty() || input.starts_with([',', '\n', '\r'])) {
        return Err(make_cut_error("delimiter after closing quote"));
    }
    Ok(s)
}

fn bare_field<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_till(0.., |c: char| c == ',' || c == '\n' || c == '\r').parse_next(input)
}

fn field(input: &mut &str) -> ModalResult<String> {
    if input.starts_with('"') {
        quoted_field(input)
    } else {
        bare_field.map(String::from).parse_next(input)
    }
}

fn row(input: &mut &str) -> ModalResult<Vec<String>> {
    let mut fields = vec![field(input)?];
    while input.starts_with(',') {
        let _ = ','.parse_next(input)?;
        fields.push(field(input)?);
    }
    Ok(fields)
}

fn eol(input: &mut &str) -> ModalResult<()> {
    if input.starts_with("\r\n") {
        let _ = "\r\n".parse_next(input)?;
    } else if input.starts_with(['\n', '\r']) {
        let _ = any.parse_next(input)?;
    } else {
        return Err(make_cut_error("end of line"));
    }
    Ok(())
}

/// All non-blank rows of the table. A row holding only `""` is a single
/// empty field, not a blank line.
fn table(input: &mut &str) -> ModalResult<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    while !input.is_empty() {
        let quoted = input.starts_with('"');
        let fields = row(input)?;
        let blank = !quoted && fields.len() == 1 && fields[0].is_empty();
        if !blank {
            rows.push(fields);
        }
        if !input.is_empty() {
            eol(input)?;
        }
    }
    Ok(rows)
}

fn offset_to_line_col(input: &str, remaining_len: usize) -> (usize, usize) {
    let consumed = input.len() - remaining_len;
    let prefix = &input[..consumed];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Parsed tabular text: the header row plus one record per data row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<VariantRecord>,
}

/// Parse comma-separated text with a header row.
///
/// Blank lines are skipped. Rows shorter than the header get empty strings
/// for the missing columns; extra trailing cells are dropped. Every value is
/// kept as a JSON string.
pub fn parse_csv(input: &str) -> Result<CsvTable, GovernanceError> {
    let text = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut remaining = text;

    let mut rows = table.parse_next(&mut remaining).map_err(|e| {
        let (line, col) = offset_to_line_col(text, remaining.len());
        GovernanceError::DatasetParse {
            line,
            col,
            message: format!("{}", e),
        }
    })?;

    if rows.is_empty() {
        return Ok(CsvTable::default());
    }
    let headers: Vec<String> = rows
        .remove(0)
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let records = rows
        .into_iter()
        .map(|cells| {
            let mut record = VariantRecord::new();
            let mut cells = cells.into_iter();
            for header in &headers {
                let value = cells.next().unwrap_or_default();
                record.set(header.clone(), Value::String(value));
            }
            record
        })
        .collect();

    Ok(CsvTable { headers, records })
}

/// Render records as comma-separated text, header row first.
///
/// Columns are `headers` followed by any field that appears in a record but
/// not in `headers`, in first-seen order. Fields containing a comma, quote,
/// or line break are quoted with inner quotes doubled. With a single column an
/// empty cell is written as `""` so the row survives a re-parse. Lines are
/// joined with `\n`, without a trailing newline.
pub fn write_csv(headers: &[String], records: &[VariantRecord]) -> String {
    let mut columns: Vec<String> = headers.to_vec();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    if columns.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| escape_field(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    for record in records {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| escape_field(&cell_text(record.get(c))))
            .collect();
        let line = cells.join(",");
        lines.push(if line.is_empty() { "\"\"".to_string() } else { line });
    }
    lines.join("\n")
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_table() {
        let table = parse_csv("variant_id,market\nv1,US\nv2,DE\n").unwrap();
        assert_eq!(table.headers, vec!["variant_id", "market"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[1].get_str("market"), Some("DE"));
    }

    #[test]
    fn parse_quoted_fields() {
        let input = "variant_id,headline\nv1,\"Save 20%, today\"\nv2,\"The \"\"best\"\" deal\"\n";
        let table = parse_csv(input).unwrap();
        assert_eq!(
            table.records[0].get_str("headline"),
            Some("Save 20%, today")
        );
        assert_eq!(
            table.records[1].get_str("headline"),
            Some("The \"best\" deal")
        );
    }

    #[test]
    fn parse_newline_inside_quotes() {
        let input = "variant_id,legal\r\nv1,\"line one\nline two\"\r\nv2,x";
        let table = parse_csv(input).unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(
            table.records[0].get_str("legal"),
            Some("line one\nline two")
        );
        assert_eq!(table.records[1].get_str("legal"), Some("x"));
    }

    #[test]
    fn parse_skips_blank_lines_and_pads_short_rows() {
        let input = "\u{feff}a,b,c\n\n1,2\n\n3,4,5,6\n";
        let table = parse_csv(input).unwrap();
        assert_eq!(table.headers, vec!["a", "b", "c"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].get_str("c"), Some(""));
        assert_eq!(table.records[1].len(), 3);
    }

    #[test]
    fn parse_header_only_and_empty() {
        let table = parse_csv("a,b\n").unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert!(table.records.is_empty());

        let table = parse_csv("").unwrap();
        assert!(table.headers.is_empty());
    }

    #[test]
    fn unterminated_quote_is_parse_error() {
        let err = parse_csv("a,b\n1,\"open").unwrap_err();
        match err {
            GovernanceError::DatasetParse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected DatasetParse, got {other:?}"),
        }
    }

    #[test]
    fn junk_after_closing_quote_is_parse_error() {
        let err = parse_csv("a\n\"x\"y\n").unwrap_err();
        assert!(matches!(err, GovernanceError::DatasetParse { line: 2, .. }));
    }

    #[test]
    fn write_quotes_special_fields() {
        let record: VariantRecord = serde_json::from_value(json!({
            "variant_id": "v1",
            "headline": "Fast, \"fresh\"\nfood",
            "approved": true,
            "note": null
        }))
        .unwrap();
        let headers = vec!["variant_id".to_string(), "headline".to_string()];
        let out = write_csv(&headers, &[record]);
        let mut lines = out.splitn(2, '\n');
        assert_eq!(lines.next(), Some("variant_id,headline,approved,note"));
        assert_eq!(
            lines.next(),
            Some("v1,\"Fast, \"\"fresh\"\"\nfood\",true,")
        );
    }

    #[test]
    fn write_then_parse_is_lossless() {
        let input = "variant_id,headline,cta\nv1,\"a,b\",\"say \"\"hi\"\"\"\nv2,\"multi\nline\",go";
        let table = parse_csv(input).unwrap();
        let written = write_csv(&table.headers, &table.records);
        assert_eq!(written, input);
        let reparsed = parse_csv(&written).unwrap();
        assert_eq!(reparsed, table);
    }

    #[test]
    fn single_column_empty_value_survives_round_trip() {
        let records: Vec<VariantRecord> = serde_json::from_value(json!([
            {"variant_id": "v1"},
            {"variant_id": ""},
            {"variant_id": "v3"}
        ]))
        .unwrap();
        let headers = vec!["variant_id".to_string()];
        let written = write_csv(&headers, &records);
        assert_eq!(written, "variant_id\nv1\n\"\"\nv3");

        let reparsed = parse_csv(&written).unwrap();
        assert_eq!(reparsed.records.len(), 3);
        assert_eq!(reparsed.records[1].get_str("variant_id"), Some(""));
        assert_eq!(reparsed.records, records);
    }

    #[test]
    fn quoted_empty_row_is_not_blank() {
        let table = parse_csv("a\n\n\"\"\nx\n").unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].get_str("a"), Some(""));
    }

    #[test]
    fn write_header_only_when_no_records() {
        let headers = vec!["variant_id".to_string(), "market".to_string()];
        assert_eq!(write_csv(&headers, &[]), "variant_id,market");
        assert_eq!(write_csv(&[], &[]), "");
    }
}
