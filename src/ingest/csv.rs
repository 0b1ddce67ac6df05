/// Splits CSV text into records. Handles quoted fields with embedded commas,
/// doubled quotes and line breaks, and both `\n` and `\r\n` line endings.
/// Blank lines are dropped.
pub fn parse_records(text: &str) -> Result<Vec<Vec<String>>, (usize, String)> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => {
                    in_quotes = false;
                }
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
            }
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err((line, "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    Ok(records)
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.len() == 1 && record[0].trim().is_empty() {
        return;
    }
    records.push(record);
}

/// A header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_text(text: &str) -> Result<Self, (usize, String)> {
        let mut records = parse_records(text)?.into_iter();
        let headers = records.next().unwrap_or_default();
        Ok(Self { headers, rows: records.collect() })
    }
}

fn quote_field(field: &str) -> String {
    if field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_line(out: &mut String, fields: &[String]) {
    let line: Vec<String> = fields
        .iter()
        .map(|f| quote_field(f))
        .collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

impl Table {
    /// Renders the header and rows as CSV, quoting only where needed.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, &self.headers);
        for row in &self.rows {
            push_line(&mut out, row);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_fields_keep_commas_and_quotes() {
        let records = parse_records("a,\"b, c\",\"say \"\"hi\"\"\"\r\n1,2,3\n").unwrap();
        assert_eq!(records, vec![
            vec!["a".to_string(), "b, c".into(), "say \"hi\"".into()],
            vec!["1".to_string(), "2".into(), "3".into()],
        ]);
    }

    #[test]
    fn blank_lines_and_missing_trailing_newline() {
        let records = parse_records("x,y\n\n1,\n2,3").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["1".to_string(), String::new()]);
        assert_eq!(records[2], vec!["2".to_string(), "3".into()]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse_records("a,\"oops\nb").unwrap_err();
        assert_eq!(err.0, 2);
    }

    #[test]
    fn table_splits_header() {
        let table = Table::from_text("METHOD,DESCRIPTION\nBoiling,In water\n").unwrap();
        assert_eq!(table.headers, ["METHOD", "DESCRIPTION"]);
        assert_eq!(table.rows, vec![vec!["Boiling".to_string(), "In water".into()]]);
    }

    #[test]
    fn rendering_quotes_only_special_fields() {
        let table = Table {
            headers: vec!["METHOD".into(), "NOTE".into()],
            rows: vec![vec!["Boiling".into(), "fast, \"rolling\"".into()]],
        };
        let text = table.to_text();
        assert_eq!(text, "METHOD,NOTE\nBoiling,\"fast, \"\"rolling\"\"\"\n");
        assert_eq!(Table::from_text(&text).unwrap(), table);
    }
}
