//! Server message parsing.

use crate::error::{Error, Result, ServerError};
use crate::protocol::wire::{FieldReader, FieldValue};
use crate::value::Value;

/// `Mysqlx.Error` severity: 0 is ERROR, 1 is FATAL.
const SEVERITY_FATAL: u64 = 1;

/// Parse a `Mysqlx.Error` payload.
///
/// Fields: 1 severity, 2 code, 3 msg, 4 sql_state.
pub fn parse_error(payload: &[u8]) -> Result<ServerError> {
    let mut err = ServerError {
        code: 0,
        sql_state: String::new(),
        message: String::new(),
        fatal: false,
    };
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => err.fatal = field.value.as_u64()? == SEVERITY_FATAL,
            2 => err.code = field.value.as_u32()?,
            3 => err.message = field.value.as_str()?.to_owned(),
            4 => err.sql_state = field.value.as_str()?.to_owned(),
            _ => {}
        }
    }
    Ok(err)
}

/// Authentication continuation or completion data (`auth_data`, field 1).
pub fn parse_auth_data(payload: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next()? {
        if field.tag == 1 {
            data = field.value.as_bytes()?.to_vec();
        }
    }
    Ok(data)
}

/// Parsed `Mysqlx.Resultset.ColumnMetaData`.
///
/// Fields: 1 type, 2 name, 3 original_name, 4 table, 5 original_table,
/// 6 schema, 7 catalog, 8 collation, 9 fractional_digits, 10 length,
/// 11 flags, 12 content_type.
#[derive(Debug, Default, Clone)]
pub struct ColumnMetaMsg {
    pub type_code: u16,
    pub name: String,
    pub original_name: Option<String>,
    pub table: Option<String>,
    pub original_table: Option<String>,
    pub schema: Option<String>,
    pub catalog: Option<String>,
    pub collation: Option<u64>,
    pub fractional_digits: Option<u16>,
    pub length: Option<u32>,
    pub flags: Option<u32>,
    pub content_type: Option<u16>,
}

pub fn parse_column_meta(payload: &[u8]) -> Result<ColumnMetaMsg> {
    let mut meta = ColumnMetaMsg::default();
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => meta.type_code = field.value.as_u32()? as u16,
            2 => meta.name = field.value.as_str()?.to_owned(),
            3 => meta.original_name = Some(field.value.as_str()?.to_owned()),
            4 => meta.table = Some(field.value.as_str()?.to_owned()),
            5 => meta.original_table = Some(field.value.as_str()?.to_owned()),
            6 => meta.schema = Some(field.value.as_str()?.to_owned()),
            7 => meta.catalog = Some(field.value.as_str()?.to_owned()),
            8 => meta.collation = Some(field.value.as_u64()?),
            9 => meta.fractional_digits = Some(field.value.as_u32()? as u16),
            10 => meta.length = Some(field.value.as_u32()?),
            11 => meta.flags = Some(field.value.as_u32()?),
            12 => meta.content_type = Some(field.value.as_u32()? as u16),
            _ => {}
        }
    }
    Ok(meta)
}

/// Parsed `Mysqlx.Resultset.Row`: one length-delimited blob per column
/// (field 1, repeated). A zero-length blob is a NULL column.
#[derive(Debug)]
pub struct RowMsg<'a> {
    pub fields: Vec<&'a [u8]>,
}

pub fn parse_row(payload: &[u8]) -> Result<RowMsg<'_>> {
    let mut fields = Vec::new();
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next()? {
        if field.tag == 1 {
            fields.push(field.value.as_bytes()?);
        }
    }
    Ok(RowMsg { fields })
}

/// Session state parameters carried by `SessionStateChanged` notices.
pub mod state_param {
    pub const CURRENT_SCHEMA: u32 = 1;
    pub const ACCOUNT_EXPIRED: u32 = 2;
    pub const GENERATED_INSERT_ID: u32 = 3;
    pub const ROWS_AFFECTED: u32 = 4;
    pub const ROWS_FOUND: u32 = 5;
    pub const ROWS_MATCHED: u32 = 6;
    pub const TRX_COMMITTED: u32 = 7;
    pub const TRX_ROLLEDBACK: u32 = 9;
    pub const PRODUCED_MESSAGE: u32 = 10;
    pub const CLIENT_ID_ASSIGNED: u32 = 11;
    pub const GENERATED_DOCUMENT_IDS: u32 = 12;
}

/// Warning levels inside a `Warning` notice.
pub mod warning_level {
    pub const NOTE: u32 = 1;
    pub const WARNING: u32 = 2;
    pub const ERROR: u32 = 3;
}

/// Decoded notice frame.
#[derive(Debug)]
pub enum NoticeMsg {
    /// SQL warning attached to the current statement.
    Warning { level: u32, code: u32, message: String },
    /// Out-of-band session state update.
    SessionStateChanged { param: u32, value: Option<Value> },
    /// Session variable change; informational only.
    SessionVariableChanged { name: String },
}

mod notice_type {
    pub const WARNING: u64 = 1;
    pub const SESSION_VARIABLE_CHANGED: u64 = 2;
    pub const SESSION_STATE_CHANGED: u64 = 3;
}

/// Parse a `Mysqlx.Notice.Frame` payload.
///
/// Fields: 1 type, 2 scope, 3 payload.
pub fn parse_notice(payload: &[u8]) -> Result<NoticeMsg> {
    let mut notice_kind: Option<u64> = None;
    let mut body: &[u8] = &[];
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => notice_kind = Some(field.value.as_u64()?),
            3 => body = field.value.as_bytes()?,
            _ => {}
        }
    }
    match notice_kind {
        Some(notice_type::WARNING) => parse_warning(body),
        Some(notice_type::SESSION_VARIABLE_CHANGED) => parse_variable_changed(body),
        Some(notice_type::SESSION_STATE_CHANGED) => parse_state_changed(body),
        Some(other) => Err(Error::Protocol(format!("unknown notice type {}", other))),
        None => Err(Error::Protocol("notice frame without type".into())),
    }
}

fn parse_warning(body: &[u8]) -> Result<NoticeMsg> {
    let mut level = warning_level::WARNING;
    let mut code = 0u32;
    let mut message = String::new();
    let mut reader = FieldReader::new(body);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => level = field.value.as_u32()?,
            2 => code = field.value.as_u32()?,
            3 => message = field.value.as_str()?.to_owned(),
            _ => {}
        }
    }
    Ok(NoticeMsg::Warning { level, code, message })
}

fn parse_variable_changed(body: &[u8]) -> Result<NoticeMsg> {
    let mut name = String::new();
    let mut reader = FieldReader::new(body);
    while let Some(field) = reader.next()? {
        if field.tag == 1 {
            name = field.value.as_str()?.to_owned();
        }
    }
    Ok(NoticeMsg::SessionVariableChanged { name })
}

fn parse_state_changed(body: &[u8]) -> Result<NoticeMsg> {
    let mut param = 0u32;
    let mut value = None;
    let mut reader = FieldReader::new(body);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => param = field.value.as_u32()?,
            2 => value = Some(parse_scalar(field.value.as_bytes()?)?),
            _ => {}
        }
    }
    Ok(NoticeMsg::SessionStateChanged { param, value })
}

/// `Mysqlx.Datatypes.Scalar` type tags.
mod scalar_type {
    pub const SINT: u64 = 1;
    pub const UINT: u64 = 2;
    pub const NULL: u64 = 3;
    pub const OCTETS: u64 = 4;
    pub const DOUBLE: u64 = 5;
    pub const FLOAT: u64 = 6;
    pub const BOOL: u64 = 7;
    pub const STRING: u64 = 8;
}

/// Parse a `Mysqlx.Datatypes.Scalar` into a [`Value`].
///
/// Fields: 1 type, 2 v_signed_int, 3 v_unsigned_int, 5 v_octets,
/// 6 v_double, 7 v_float, 8 v_bool, 9 v_string.
pub fn parse_scalar(body: &[u8]) -> Result<Value> {
    let mut kind: Option<u64> = None;
    let mut raw: Option<FieldValue<'_>> = None;
    let mut reader = FieldReader::new(body);
    while let Some(field) = reader.next()? {
        match field.tag {
            1 => kind = Some(field.value.as_u64()?),
            2 | 3 | 5 | 6 | 7 | 8 | 9 => raw = Some(field.value),
            _ => {}
        }
    }
    let kind = kind.ok_or_else(|| Error::Protocol("scalar without type".into()))?;
    let value = match kind {
        scalar_type::NULL => Value::Null,
        scalar_type::SINT => Value::Int(required(raw)?.as_sint()?),
        scalar_type::UINT => Value::Uint(required(raw)?.as_u64()?),
        scalar_type::DOUBLE => Value::Double(required(raw)?.as_f64()?),
        scalar_type::FLOAT => Value::Float(required(raw)?.as_f32()?),
        scalar_type::BOOL => Value::Bool(required(raw)?.as_bool()?),
        scalar_type::OCTETS => Value::Bytes(nested_value_bytes(required(raw)?.as_bytes()?)?),
        scalar_type::STRING => {
            let bytes = nested_value_bytes(required(raw)?.as_bytes()?)?;
            Value::Str(crate::codec::decode_text(&bytes)?)
        }
        other => return Err(Error::Protocol(format!("unknown scalar type {}", other))),
    };
    Ok(value)
}

fn required<'a>(raw: Option<FieldValue<'a>>) -> Result<FieldValue<'a>> {
    raw.ok_or_else(|| Error::Protocol("scalar missing value field".into()))
}

/// Octets/String scalars nest their content as field 1 of a sub-message.
fn nested_value_bytes(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut reader = FieldReader::new(body);
    while let Some(field) = reader.next()? {
        if field.tag == 1 {
            out = field.value.as_bytes()?.to_vec();
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{
        write_bytes_field, write_nested, write_sint_field, write_str_field, write_uint_field,
    };

    #[test]
    fn error_fields() {
        let mut payload = Vec::new();
        write_uint_field(&mut payload, 1, 1); // FATAL
        write_uint_field(&mut payload, 2, 1045);
        write_str_field(&mut payload, 3, "Access denied");
        write_str_field(&mut payload, 4, "HY000");

        let err = parse_error(&payload).unwrap();
        assert!(err.fatal);
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state, "HY000");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn row_fields_and_null_columns() {
        let mut payload = Vec::new();
        write_bytes_field(&mut payload, 1, b"abc\0");
        write_bytes_field(&mut payload, 1, b"");
        write_bytes_field(&mut payload, 1, &[0x07]);

        let row = parse_row(&payload).unwrap();
        assert_eq!(row.fields.len(), 3);
        assert_eq!(row.fields[0], b"abc\0");
        assert!(row.fields[1].is_empty());
    }

    #[test]
    fn state_changed_notice() {
        let mut payload = Vec::new();
        write_uint_field(&mut payload, 1, 3); // SessionStateChanged
        write_nested(&mut payload, 3, |body| {
            write_uint_field(body, 1, u64::from(state_param::ROWS_AFFECTED));
            write_nested(body, 2, |scalar| {
                write_uint_field(scalar, 1, 2); // UINT
                write_uint_field(scalar, 3, 7);
            });
        });

        match parse_notice(&payload).unwrap() {
            NoticeMsg::SessionStateChanged { param, value } => {
                assert_eq!(param, state_param::ROWS_AFFECTED);
                assert_eq!(value, Some(Value::Uint(7)));
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[test]
    fn warning_notice() {
        let mut payload = Vec::new();
        write_uint_field(&mut payload, 1, 1); // Warning
        write_nested(&mut payload, 3, |body| {
            write_uint_field(body, 1, u64::from(warning_level::WARNING));
            write_uint_field(body, 2, 1366);
            write_str_field(body, 3, "Incorrect value");
        });

        match parse_notice(&payload).unwrap() {
            NoticeMsg::Warning { level, code, message } => {
                assert_eq!(level, warning_level::WARNING);
                assert_eq!(code, 1366);
                assert_eq!(message, "Incorrect value");
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[test]
    fn scalar_string_value() {
        let mut scalar = Vec::new();
        write_uint_field(&mut scalar, 1, 8); // STRING
        write_nested(&mut scalar, 9, |s| {
            write_bytes_field(s, 1, "app_db".as_bytes());
        });
        assert_eq!(
            parse_scalar(&scalar).unwrap(),
            Value::Str("app_db".to_owned())
        );
    }

    #[test]
    fn scalar_sint_value() {
        let mut scalar = Vec::new();
        write_uint_field(&mut scalar, 1, 1); // SINT
        write_sint_field(&mut scalar, 2, -42);
        assert_eq!(parse_scalar(&scalar).unwrap(), Value::Int(-42));
    }
}
