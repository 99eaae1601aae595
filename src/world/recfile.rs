//! Reader for GNU recutils text databases (`.rec` files).
//!
//! Supports the subset world files use:
//!
//! ```text
//! # comment
//! %rec: Room
//! %mandatory: Id Name Zone
//! %key: Id
//!
//! Id: foyer
//! Name: Foyer
//! Description: A marble entrance hall.
//! + Exits: #hallway
//! Zone: floor-1
//! ```
//!
//! `+` lines continue the previous field on a new line, a trailing backslash
//! joins two physical lines, blank lines separate records.

use std::collections::HashSet;

use crate::errors::MuddError;

/// One record: ordered `(field, value)` pairs plus the line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rec_type: Option<String>,
    pub line: usize,
    pub fields: Vec<(String, String)>,
}

impl Record {
    /// First value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default, Clone)]
struct Descriptor {
    rec_type: Option<String>,
    mandatory: Vec<String>,
    keys: Vec<String>,
}

/// A parsed file.
#[derive(Debug, Default, Clone)]
pub struct RecFile {
    pub records: Vec<Record>,
}

impl RecFile {
    /// Records whose `%rec:` type is `rec_type`.
    pub fn of_type<'a>(&'a self, rec_type: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.rec_type.as_deref() == Some(rec_type))
    }
}

struct Parser<'a> {
    file: &'a str,
    records: Vec<Record>,
    descriptor: Descriptor,
    in_descriptor: bool,
    current: Option<Record>,
    seen_keys: HashSet<(String, String, String)>,
}

impl<'a> Parser<'a> {
    fn error(&self, line: usize, message: impl Into<String>) -> MuddError {
        MuddError::WorldParse {
            file: self.file.to_string(),
            line,
            message: message.into(),
        }
    }

    fn finish_record(&mut self) -> Result<(), MuddError> {
        if self.in_descriptor {
            self.in_descriptor = false;
            return Ok(());
        }
        let Some(record) = self.current.take() else {
            return Ok(());
        };
        for field in &self.descriptor.mandatory {
            if record.get(field).is_none() {
                return Err(self.error(
                    record.line,
                    format!("record is missing mandatory field '{}'", field),
                ));
            }
        }
        for key in &self.descriptor.keys {
            let Some(value) = record.get(key) else {
                return Err(self.error(record.line, format!("record is missing key field '{}'", key)));
            };
            let marker = (
                record.rec_type.clone().unwrap_or_default(),
                key.clone(),
                value.to_string(),
            );
            if !self.seen_keys.insert(marker) {
                return Err(self.error(
                    record.line,
                    format!("duplicate key {} '{}'", key, value),
                ));
            }
        }
        self.records.push(record);
        Ok(())
    }

    fn descriptor_line(&mut self, line_no: usize, name: &str, value: &str) -> Result<(), MuddError> {
        match name {
            "%rec" => {
                self.finish_record()?;
                let rec_type = value.split_whitespace().next().unwrap_or_default();
                if rec_type.is_empty() {
                    return Err(self.error(line_no, "%rec: needs a record type"));
                }
                self.descriptor = Descriptor {
                    rec_type: Some(rec_type.to_string()),
                    ..Descriptor::default()
                };
                self.in_descriptor = true;
            }
            "%mandatory" => self
                .descriptor
                .mandatory
                .extend(value.split_whitespace().map(str::to_string)),
            "%key" => self
                .descriptor
                .keys
                .extend(value.split_whitespace().map(str::to_string)),
            // %type, %doc, %sort and friends carry no constraints we enforce.
            _ => {}
        }
        Ok(())
    }

    fn field_line(&mut self, line_no: usize, name: &str, value: &str) {
        let record = self.current.get_or_insert_with(|| Record {
            rec_type: self.descriptor.rec_type.clone(),
            line: line_no,
            fields: Vec::new(),
        });
        record.fields.push((name.to_string(), value.to_string()));
    }

    fn continuation(&mut self, line_no: usize, text: &str) -> Result<(), MuddError> {
        let Some(record) = self.current.as_mut() else {
            return Err(self.error(line_no, "continuation line outside a record"));
        };
        let Some((_, value)) = record.fields.last_mut() else {
            return Err(self.error(line_no, "continuation line without a field"));
        };
        value.push('\n');
        value.push_str(text);
        Ok(())
    }
}

fn valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '%' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Join physical lines ending in a backslash, keeping the first line's number.
fn logical_lines(contents: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let (start, mut text) = match pending.take() {
            Some((start, mut acc)) => {
                acc.push_str(raw);
                (start, acc)
            }
            None => (line_no, raw.to_string()),
        };
        if text.ends_with('\\') && !text.starts_with('#') {
            text.pop();
            pending = Some((start, text));
        } else {
            out.push((start, text));
        }
    }
    if let Some(rest) = pending {
        out.push(rest);
    }
    out
}

/// Parse the contents of one `.rec` file. `file` is only used in error messages.
pub fn parse(file: &str, contents: &str) -> Result<RecFile, MuddError> {
    let mut parser = Parser {
        file,
        records: Vec::new(),
        descriptor: Descriptor::default(),
        in_descriptor: false,
        current: None,
        seen_keys: HashSet::new(),
    };

    for (line_no, line) in logical_lines(contents) {
        if line.trim().is_empty() {
            parser.finish_record()?;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line == "+" {
            parser.continuation(line_no, "")?;
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            let text = rest.strip_prefix(' ').unwrap_or(rest);
            parser.continuation(line_no, text)?;
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(parser.error(line_no, format!("expected 'Field: value', got '{}'", line)));
        };
        if !valid_field_name(name) {
            return Err(parser.error(line_no, format!("invalid field name '{}'", name)));
        }
        let value = value.strip_prefix(' ').unwrap_or(value);
        if name.starts_with('%') {
            parser.descriptor_line(line_no, name, value.trim())?;
        } else if parser.in_descriptor {
            return Err(parser.error(line_no, "ordinary field inside a record descriptor"));
        } else {
            parser.field_line(line_no, name, value);
        }
    }
    parser.finish_record()?;

    Ok(RecFile {
        records: parser.records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# The mansion
%rec: Zone
%key: Id

Id: floor-1
Name: Floor 1

%rec: Room
%mandatory: Id Name Zone

Id: foyer
Name: Foyer
Description: A marble hall.
+ Exits: #hallway
+
+ Mind the step.
Zone: floor-1
IsDefault: yes

Id: office
Name: Office
Description: Papers \\
everywhere.
Zone: floor-1
HasVoice: yes
";

    #[test]
    fn parses_typed_records() {
        let rec = parse("mansion.rec", SAMPLE).expect("parse");
        let zones: Vec<_> = rec.of_type("Zone").collect();
        let rooms: Vec<_> = rec.of_type("Room").collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(rooms.len(), 2);
        assert_eq!(zones[0].get("Name"), Some("Floor 1"));
        assert_eq!(
            rooms[0].get("Description"),
            Some("A marble hall.\nExits: #hallway\n\nMind the step.")
        );
        assert_eq!(rooms[1].get("Description"), Some("Papers everywhere."));
        assert_eq!(rooms[1].get("HasVoice"), Some("yes"));
    }

    #[test]
    fn missing_mandatory_field_is_an_error() {
        let text = "%rec: Room\n%mandatory: Zone\n\nId: attic\nName: Attic\n";
        let err = parse("bad.rec", text).unwrap_err();
        match err {
            MuddError::WorldParse { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("Zone"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_key_is_an_error() {
        let text = "%rec: Zone\n%key: Id\n\nId: a\nName: A\n\nId: a\nName: Again\n";
        assert!(matches!(
            parse("dup.rec", text),
            Err(MuddError::WorldParse { line: 7, .. })
        ));
    }

    #[test]
    fn garbage_line_is_an_error() {
        let text = "%rec: Zone\n\nthis is not a field\n";
        assert!(matches!(
            parse("junk.rec", text),
            Err(MuddError::WorldParse { line: 3, .. })
        ));
    }

    #[test]
    fn file_without_a_type_yields_no_rooms() {
        let rec = parse("notes.rec", "Id: x\nName: y\n").expect("parse");
        assert_eq!(rec.of_type("Room").count(), 0);
        assert_eq!(rec.records.len(), 1);
    }
}
