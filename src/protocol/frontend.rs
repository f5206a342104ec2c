//! Client message builders.
//!
//! Each builder appends one complete frame to the output buffer. Expression
//! content for CRUD messages (criteria, projections, orderings, update
//! operations) crosses this boundary as pre-encoded sub-message bodies
//! produced by the converter layer; literal scalars are encoded here.

use crate::protocol::frame::{client_msg, write_frame};
use crate::protocol::wire::{
    write_bool_field, write_bytes_field, write_double_field, write_float_field, write_nested,
    write_sint_field, write_str_field, write_uint_field,
};
use crate::value::Value;

/// Data model a CRUD operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataModel {
    Document = 1,
    Table = 2,
}

/// Schema-qualified collection or table reference.
#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub schema: String,
    pub name: String,
}

impl CollectionRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `Mysqlx.Crud.Collection`: 1 name, 2 schema.
    fn encode(&self, out: &mut Vec<u8>, field: u32) {
        write_nested(out, field, |body| {
            write_str_field(body, 1, &self.name);
            write_str_field(body, 2, &self.schema);
        });
    }
}

/// Row-count limit with optional offset (`Mysqlx.Crud.Limit`).
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub row_count: u64,
    pub offset: Option<u64>,
}

impl Limit {
    fn encode(&self, out: &mut Vec<u8>, field: u32) {
        write_nested(out, field, |body| {
            write_uint_field(body, 1, self.row_count);
            if let Some(offset) = self.offset {
                write_uint_field(body, 2, offset);
            }
        });
    }
}

/// `Mysqlx.Datatypes.Scalar` from a [`Value`].
fn write_scalar(out: &mut Vec<u8>, field: u32, value: &Value) {
    write_nested(out, field, |body| match value {
        Value::Null => write_uint_field(body, 1, 3),
        Value::Int(v) => {
            write_uint_field(body, 1, 1);
            write_sint_field(body, 2, *v);
        }
        Value::Uint(v) => {
            write_uint_field(body, 1, 2);
            write_uint_field(body, 3, *v);
        }
        Value::Bool(v) => {
            write_uint_field(body, 1, 7);
            write_bool_field(body, 8, *v);
        }
        Value::Double(v) => {
            write_uint_field(body, 1, 5);
            write_double_field(body, 6, *v);
        }
        Value::Float(v) => {
            write_uint_field(body, 1, 6);
            write_float_field(body, 7, *v);
        }
        Value::Bytes(v) => {
            write_uint_field(body, 1, 4);
            write_nested(body, 5, |octets| {
                write_bytes_field(octets, 1, v);
            });
        }
        Value::Str(v) => {
            write_uint_field(body, 1, 8);
            write_nested(body, 9, |s| {
                write_bytes_field(s, 1, v.as_bytes());
            });
        }
    });
}

/// `Mysqlx.Datatypes.Any` wrapping a scalar.
fn write_any(out: &mut Vec<u8>, field: u32, value: &Value) {
    write_nested(out, field, |body| {
        write_uint_field(body, 1, 1); // SCALAR
        write_scalar(body, 2, value);
    });
}

/// Literal `Mysqlx.Expr.Expr` wrapping a scalar.
fn write_literal_expr(out: &mut Vec<u8>, field: u32, value: &Value) {
    write_nested(out, field, |body| {
        write_uint_field(body, 1, 2); // LITERAL
        write_scalar(body, 4, value);
    });
}

/// `AuthenticateStart { 1 mech_name, 2 auth_data, 3 initial_response }`.
pub fn auth_start(out: &mut Vec<u8>, mechanism: &str, auth_data: &[u8], initial_response: &[u8]) {
    let mut payload = Vec::new();
    write_str_field(&mut payload, 1, mechanism);
    if !auth_data.is_empty() {
        write_bytes_field(&mut payload, 2, auth_data);
    }
    if !initial_response.is_empty() {
        write_bytes_field(&mut payload, 3, initial_response);
    }
    write_frame(out, client_msg::SESS_AUTHENTICATE_START, &payload);
}

/// `AuthenticateContinue { 1 auth_data }`.
pub fn auth_continue(out: &mut Vec<u8>, auth_data: &[u8]) {
    let mut payload = Vec::new();
    write_bytes_field(&mut payload, 1, auth_data);
    write_frame(out, client_msg::SESS_AUTHENTICATE_CONTINUE, &payload);
}

/// `StmtExecute { 1 namespace, 2 stmt, 3 args }`.
pub fn stmt_execute(out: &mut Vec<u8>, namespace: &str, stmt: &str, args: &[Value]) {
    let mut payload = Vec::new();
    write_str_field(&mut payload, 1, namespace);
    write_bytes_field(&mut payload, 2, stmt.as_bytes());
    for arg in args {
        write_any(&mut payload, 3, arg);
    }
    write_frame(out, client_msg::SQL_STMT_EXECUTE, &payload);
}

/// Parameters of a `Crud.Find` message.
///
/// Fields: 2 collection, 3 data_model, 4 projection, 5 criteria, 6 limit,
/// 7 order, 8 grouping, 9 grouping_criteria.
#[derive(Debug, Clone)]
pub struct FindParams {
    pub collection: CollectionRef,
    pub data_model: DataModel,
    /// Pre-encoded `Projection` bodies.
    pub projection: Vec<Vec<u8>>,
    /// Pre-encoded criteria `Expr` body.
    pub criteria: Option<Vec<u8>>,
    pub limit: Option<Limit>,
    /// Pre-encoded `Order` bodies.
    pub order: Vec<Vec<u8>>,
    /// Pre-encoded grouping `Expr` bodies.
    pub grouping: Vec<Vec<u8>>,
    /// Pre-encoded having `Expr` body.
    pub grouping_criteria: Option<Vec<u8>>,
}

impl FindParams {
    pub fn new(collection: CollectionRef, data_model: DataModel) -> Self {
        Self {
            collection,
            data_model,
            projection: Vec::new(),
            criteria: None,
            limit: None,
            order: Vec::new(),
            grouping: Vec::new(),
            grouping_criteria: None,
        }
    }
}

pub fn crud_find(out: &mut Vec<u8>, params: &FindParams) {
    let mut payload = Vec::new();
    params.collection.encode(&mut payload, 2);
    write_uint_field(&mut payload, 3, params.data_model as u64);
    for proj in &params.projection {
        write_bytes_field(&mut payload, 4, proj);
    }
    if let Some(criteria) = &params.criteria {
        write_bytes_field(&mut payload, 5, criteria);
    }
    if let Some(limit) = &params.limit {
        limit.encode(&mut payload, 6);
    }
    for order in &params.order {
        write_bytes_field(&mut payload, 7, order);
    }
    for group in &params.grouping {
        write_bytes_field(&mut payload, 8, group);
    }
    if let Some(having) = &params.grouping_criteria {
        write_bytes_field(&mut payload, 9, having);
    }
    write_frame(out, client_msg::CRUD_FIND, &payload);
}

/// `Crud.Insert { 1 collection, 2 data_model, 3 projection, 4 row }`.
///
/// Each row is a `TypedRow` of literal expressions; documents are single-column
/// rows carrying the encoded document.
pub fn crud_insert(
    out: &mut Vec<u8>,
    collection: &CollectionRef,
    data_model: DataModel,
    columns: &[String],
    rows: &[Vec<Value>],
) {
    let mut payload = Vec::new();
    collection.encode(&mut payload, 1);
    write_uint_field(&mut payload, 2, data_model as u64);
    for column in columns {
        write_nested(&mut payload, 3, |body| {
            write_str_field(body, 1, column);
        });
    }
    for row in rows {
        write_nested(&mut payload, 4, |body| {
            for value in row {
                write_literal_expr(body, 1, value);
            }
        });
    }
    write_frame(out, client_msg::CRUD_INSERT, &payload);
}

/// One pre-encoded `UpdateOperation` body.
pub type UpdateOperation = Vec<u8>;

/// `Crud.Update { 2 collection, 3 data_model, 4 criteria, 5 limit, 6 order,
/// 7 operation }`.
pub fn crud_update(
    out: &mut Vec<u8>,
    collection: &CollectionRef,
    data_model: DataModel,
    criteria: Option<&[u8]>,
    limit: Option<&Limit>,
    order: &[Vec<u8>],
    operations: &[UpdateOperation],
) {
    let mut payload = Vec::new();
    collection.encode(&mut payload, 2);
    write_uint_field(&mut payload, 3, data_model as u64);
    if let Some(criteria) = criteria {
        write_bytes_field(&mut payload, 4, criteria);
    }
    if let Some(limit) = limit {
        limit.encode(&mut payload, 5);
    }
    for o in order {
        write_bytes_field(&mut payload, 6, o);
    }
    for op in operations {
        write_bytes_field(&mut payload, 7, op);
    }
    write_frame(out, client_msg::CRUD_UPDATE, &payload);
}

/// `Crud.Delete { 1 collection, 2 data_model, 3 criteria, 4 limit, 5 order }`.
pub fn crud_delete(
    out: &mut Vec<u8>,
    collection: &CollectionRef,
    data_model: DataModel,
    criteria: Option<&[u8]>,
    limit: Option<&Limit>,
    order: &[Vec<u8>],
) {
    let mut payload = Vec::new();
    collection.encode(&mut payload, 1);
    write_uint_field(&mut payload, 2, data_model as u64);
    if let Some(criteria) = criteria {
        write_bytes_field(&mut payload, 3, criteria);
    }
    if let Some(limit) = limit {
        limit.encode(&mut payload, 4);
    }
    for o in order {
        write_bytes_field(&mut payload, 5, o);
    }
    write_frame(out, client_msg::CRUD_DELETE, &payload);
}

/// `Session.Reset`, empty payload.
pub fn session_reset(out: &mut Vec<u8>) {
    write_frame(out, client_msg::SESS_RESET, &[]);
}

/// `Session.Close`, empty payload.
pub fn session_close(out: &mut Vec<u8>) {
    write_frame(out, client_msg::SESS_CLOSE, &[]);
}

/// `Connection.Close`, empty payload.
pub fn con_close(out: &mut Vec<u8>) {
    write_frame(out, client_msg::CON_CLOSE, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::HEADER_LEN;
    use crate::protocol::wire::{FieldReader, FieldValue};

    fn payload_of(buf: &[u8], expect_type: u8) -> &[u8] {
        assert_eq!(buf[4], expect_type);
        &buf[HEADER_LEN..]
    }

    #[test]
    fn auth_start_omits_empty_optionals() {
        let mut buf = Vec::new();
        auth_start(&mut buf, "MYSQL41", &[], &[]);
        let payload = payload_of(&buf, client_msg::SESS_AUTHENTICATE_START);

        let mut r = FieldReader::new(payload);
        let f = r.next().unwrap().unwrap();
        assert_eq!(f.tag, 1);
        assert_eq!(f.value.as_str().unwrap(), "MYSQL41");
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn stmt_execute_layout() {
        let mut buf = Vec::new();
        stmt_execute(
            &mut buf,
            "sql",
            "SELECT ?",
            &[Value::Int(-5), Value::Str("x".into())],
        );
        let payload = payload_of(&buf, client_msg::SQL_STMT_EXECUTE);

        let mut r = FieldReader::new(payload);
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_str().unwrap()), (1, "sql"));
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_bytes().unwrap()), (2, b"SELECT ?".as_slice()));
        let mut args = 0;
        while let Some(f) = r.next().unwrap() {
            assert_eq!(f.tag, 3);
            assert!(matches!(f.value, FieldValue::Bytes(_)));
            args += 1;
        }
        assert_eq!(args, 2);
    }

    #[test]
    fn bool_scalar_layout() {
        let mut buf = Vec::new();
        write_scalar(&mut buf, 1, &Value::Bool(true));

        let mut r = FieldReader::new(&buf);
        let f = r.next().unwrap().unwrap();
        assert_eq!(f.tag, 1);
        let mut r = FieldReader::new(f.value.as_bytes().unwrap());
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_u64().unwrap()), (1, 7));
        let f = r.next().unwrap().unwrap();
        assert_eq!(f.tag, 8);
        assert!(f.value.as_bool().unwrap());
    }

    #[test]
    fn insert_rows_become_literal_typed_rows() {
        let mut buf = Vec::new();
        let coll = CollectionRef::new("db", "t");
        crud_insert(
            &mut buf,
            &coll,
            DataModel::Table,
            &["id".to_owned()],
            &[vec![Value::Uint(1)], vec![Value::Uint(2)]],
        );
        let payload = payload_of(&buf, client_msg::CRUD_INSERT);

        let mut rows = 0;
        let mut r = FieldReader::new(payload);
        while let Some(f) = r.next().unwrap() {
            if f.tag == 4 {
                rows += 1;
            }
        }
        assert_eq!(rows, 2);
    }
}
