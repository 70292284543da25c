//! Binding between string property bags and typed JSON records.
//!
//! `bind_value` instantiates a record from `name -> string` pairs following
//! the schema: enums by symbol, numerics by standard parse, booleans by
//! literal, arrays as JSON arrays or comma-separated text, nested records by
//! dotted path or inline JSON. `extract_value` is the inverse: null fields
//! are omitted, nested records flatten to dotted paths, arrays over objects
//! flatten to indexed keys (`items.0.name`). For supported shapes,
//! `extract_value ∘ bind_value` is the identity.

use std::collections::HashMap;

use serde_json::Value;

use super::{Property, PropertyType, Schema, SchemaError};

/// String property bag: field path -> raw text value.
pub type PropertyBag = HashMap<String, String>;

/// Instantiates a JSON record from a property bag against `schema`.
///
/// Fails with [`SchemaError::Bind`] naming the offending field when a
/// required value is missing or a value does not parse as its declared type.
pub fn bind_value(schema: &Schema, bag: &PropertyBag) -> Result<Value, SchemaError> {
    let mut out = serde_json::Map::new();
    for prop in &schema.properties {
        if let Some(v) = bind_property(prop, &prop.name, bag)? {
            out.insert(prop.name.clone(), v);
        }
    }
    Ok(Value::Object(out))
}

/// Flattens a JSON record into a property bag against `schema`.
///
/// Null and absent fields are omitted. Enums render their declared symbol;
/// scalar arrays render as a JSON array string; arrays over objects flatten
/// to indexed dotted keys.
pub fn extract_value(schema: &Schema, value: &Value) -> PropertyBag {
    let mut out = PropertyBag::new();
    for prop in &schema.properties {
        let field = value.get(&prop.name).unwrap_or(&Value::Null);
        extract_property(prop, &prop.name, field, &mut out);
    }
    out
}

fn bind_property(
    prop: &Property,
    path: &str,
    bag: &PropertyBag,
) -> Result<Option<Value>, SchemaError> {
    if prop.multi_select && prop.kind != PropertyType::Array {
        return bind_scalar_list(prop, path, bag);
    }
    match prop.kind {
        PropertyType::Object => bind_object(prop, path, bag),
        PropertyType::Array => bind_array(prop, path, bag),
        _ => match bag.get(path) {
            Some(raw) => parse_scalar(prop, path, raw).map(Some),
            None if prop.required => Err(missing(path)),
            None => Ok(None),
        },
    }
}

fn bind_object(
    prop: &Property,
    path: &str,
    bag: &PropertyBag,
) -> Result<Option<Value>, SchemaError> {
    // An inline JSON value under the exact key wins over dotted-path assembly.
    if let Some(raw) = bag.get(path) {
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|e| SchemaError::bind(path, format!("invalid JSON object: {e}")))?;
        return Ok(Some(parsed));
    }
    let mut obj = serde_json::Map::new();
    for nested in &prop.properties {
        let nested_path = format!("{path}.{}", nested.name);
        if let Some(v) = bind_property(nested, &nested_path, bag)? {
            obj.insert(nested.name.clone(), v);
        }
    }
    if obj.is_empty() {
        if prop.required {
            return Err(missing(path));
        }
        return Ok(None);
    }
    Ok(Some(Value::Object(obj)))
}

fn bind_array(
    prop: &Property,
    path: &str,
    bag: &PropertyBag,
) -> Result<Option<Value>, SchemaError> {
    let item = prop.items.as_deref();
    if let Some(raw) = bag.get(path) {
        return parse_array_text(item, path, raw).map(Some);
    }
    // Arrays over objects may arrive flattened to indexed keys: path.0.field.
    if let Some(item) = item {
        if item.kind == PropertyType::Object {
            let mut elems = Vec::new();
            for index in 0.. {
                let elem_path = format!("{path}.{index}");
                let has_any = item
                    .properties
                    .iter()
                    .any(|p| bag.contains_key(&format!("{elem_path}.{}", p.name)));
                if !has_any {
                    break;
                }
                match bind_object(item, &elem_path, bag)? {
                    Some(v) => elems.push(v),
                    None => break,
                }
            }
            if !elems.is_empty() {
                return Ok(Some(Value::Array(elems)));
            }
        }
    }
    if prop.required {
        return Err(missing(path));
    }
    Ok(None)
}

/// Multi-select scalar (e.g. enum): accepts a JSON array string or
/// comma-separated symbols; each element parses as the base type.
fn bind_scalar_list(
    prop: &Property,
    path: &str,
    bag: &PropertyBag,
) -> Result<Option<Value>, SchemaError> {
    match bag.get(path) {
        Some(raw) => {
            let mut base = prop.clone();
            base.multi_select = false;
            parse_array_text(Some(&base), path, raw).map(Some)
        }
        None if prop.required => Err(missing(path)),
        None => Ok(None),
    }
}

fn parse_array_text(
    item: Option<&Property>,
    path: &str,
    raw: &str,
) -> Result<Value, SchemaError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let parsed: Value = serde_json::from_str(trimmed)
            .map_err(|e| SchemaError::bind(path, format!("invalid JSON array: {e}")))?;
        let Value::Array(elems) = parsed else {
            return Err(SchemaError::bind(path, "expected a JSON array"));
        };
        let elems = elems
            .into_iter()
            .map(|e| coerce_element(item, path, e))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(elems));
    }
    if trimmed.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    // Comma-separated scalars.
    let elems = trimmed
        .split(',')
        .map(str::trim)
        .map(|part| match item {
            Some(item) => parse_scalar(item, path, part),
            None => Ok(Value::String(part.to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(elems))
}

/// Coerces one already-parsed JSON array element to the item type; string
/// elements go through the scalar parser so `["1","2"]` binds as integers.
fn coerce_element(item: Option<&Property>, path: &str, elem: Value) -> Result<Value, SchemaError> {
    let Some(item) = item else {
        return Ok(elem);
    };
    match (&elem, item.kind) {
        (Value::String(s), k) if k != PropertyType::String && k != PropertyType::Object => {
            parse_scalar(item, path, s)
        }
        _ => Ok(elem),
    }
}

fn parse_scalar(prop: &Property, path: &str, raw: &str) -> Result<Value, SchemaError> {
    match prop.kind {
        PropertyType::String => Ok(Value::String(raw.to_string())),
        PropertyType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| SchemaError::bind(path, format!("`{raw}` is not an integer"))),
        PropertyType::Number => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| SchemaError::bind(path, format!("`{raw}` is not a number")))
            .and_then(|n| {
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| SchemaError::bind(path, "non-finite number"))
            }),
        PropertyType::Boolean => match raw.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(SchemaError::bind(
                path,
                format!("`{other}` is not a boolean literal"),
            )),
        },
        PropertyType::Enum => {
            let symbol = raw.trim();
            if prop.enum_values.iter().any(|s| s == symbol) {
                Ok(Value::String(symbol.to_string()))
            } else {
                Err(SchemaError::bind(
                    path,
                    format!(
                        "`{symbol}` is not one of [{}]",
                        prop.enum_values.join(", ")
                    ),
                ))
            }
        }
        PropertyType::Array | PropertyType::Object => Err(SchemaError::bind(
            path,
            "expected a structured value, got a scalar",
        )),
    }
}

fn extract_property(prop: &Property, path: &str, value: &Value, out: &mut PropertyBag) {
    if value.is_null() {
        return;
    }
    if prop.multi_select && prop.kind != PropertyType::Array {
        if let Value::Array(_) = value {
            out.insert(path.to_string(), value.to_string());
        }
        return;
    }
    match prop.kind {
        PropertyType::Object => {
            for nested in &prop.properties {
                let nested_path = format!("{path}.{}", nested.name);
                let field = value.get(&nested.name).unwrap_or(&Value::Null);
                extract_property(nested, &nested_path, field, out);
            }
        }
        PropertyType::Array => {
            let Value::Array(elems) = value else { return };
            let object_items = prop
                .items
                .as_ref()
                .is_some_and(|i| i.kind == PropertyType::Object);
            if object_items {
                let item = prop.items.as_deref().expect("object items checked");
                for (index, elem) in elems.iter().enumerate() {
                    let elem_path = format!("{path}.{index}");
                    extract_property(item, &elem_path, elem, out);
                }
            } else {
                out.insert(path.to_string(), value.to_string());
            }
        }
        _ => {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(path.to_string(), text);
        }
    }
}

fn missing(path: &str) -> SchemaError {
    SchemaError::bind(path, "required value missing")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn booking_schema() -> Schema {
        Schema::new("booking")
            .property(Property::string("name").required())
            .property(Property::integer("seats"))
            .property(Property::number("budget"))
            .property(Property::boolean("window"))
            .property(Property::enumeration("class", ["economy", "business"]))
            .property(Property::object(
                "contact",
                vec![
                    Property::string("email").required(),
                    Property::string("phone"),
                ],
            ))
            .property(Property::array("tags", Property::string("tag")))
    }

    fn bag(pairs: &[(&str, &str)]) -> PropertyBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// **Scenario**: Scalars parse by declared type; the bound record carries
    /// native JSON values.
    #[test]
    fn bind_parses_scalars_by_type() {
        let schema = booking_schema();
        let value = bind_value(
            &schema,
            &bag(&[
                ("name", "Ada"),
                ("seats", "2"),
                ("budget", "99.5"),
                ("window", "true"),
                ("class", "business"),
                ("contact.email", "ada@example.com"),
            ]),
        )
        .expect("bind");
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["seats"], 2);
        assert_eq!(value["budget"], 99.5);
        assert_eq!(value["window"], true);
        assert_eq!(value["class"], "business");
        assert_eq!(value["contact"]["email"], "ada@example.com");
    }

    /// **Scenario**: A missing required field fails with a Bind error naming it.
    #[test]
    fn bind_missing_required_names_field() {
        let schema = booking_schema();
        let err = bind_value(&schema, &bag(&[("seats", "2")])).unwrap_err();
        match err {
            SchemaError::Bind { field, .. } => assert_eq!(field, "name"),
            other => panic!("expected Bind, got {other:?}"),
        }
    }

    /// **Scenario**: An unparseable integer fails with a Bind error naming the field.
    #[test]
    fn bind_unparseable_integer_names_field() {
        let schema = booking_schema();
        let err = bind_value(&schema, &bag(&[("name", "Ada"), ("seats", "two")])).unwrap_err();
        match err {
            SchemaError::Bind { field, message } => {
                assert_eq!(field, "seats");
                assert!(message.contains("integer"), "{message}");
            }
            other => panic!("expected Bind, got {other:?}"),
        }
    }

    /// **Scenario**: An enum value outside the declared symbols is rejected.
    #[test]
    fn bind_rejects_unknown_enum_symbol() {
        let schema = booking_schema();
        let err = bind_value(&schema, &bag(&[("name", "Ada"), ("class", "first")])).unwrap_err();
        match err {
            SchemaError::Bind { field, message } => {
                assert_eq!(field, "class");
                assert!(message.contains("economy"), "{message}");
            }
            other => panic!("expected Bind, got {other:?}"),
        }
    }

    /// **Scenario**: Arrays accept both JSON array text and comma-separated text.
    #[test]
    fn bind_array_json_and_comma_separated() {
        let schema = booking_schema();
        let via_json = bind_value(
            &schema,
            &bag(&[("name", "Ada"), ("tags", r#"["a","b"]"#)]),
        )
        .expect("bind json");
        assert_eq!(via_json["tags"], serde_json::json!(["a", "b"]));

        let via_commas =
            bind_value(&schema, &bag(&[("name", "Ada"), ("tags", "a, b")])).expect("bind commas");
        assert_eq!(via_commas["tags"], serde_json::json!(["a", "b"]));
    }

    /// **Scenario**: Nested objects bind from dotted paths and from inline JSON.
    #[test]
    fn bind_object_dotted_and_inline_json() {
        let schema = booking_schema();
        let dotted = bind_value(
            &schema,
            &bag(&[
                ("name", "Ada"),
                ("contact.email", "a@b.c"),
                ("contact.phone", "123"),
            ]),
        )
        .expect("bind dotted");
        assert_eq!(dotted["contact"]["phone"], "123");

        let inline = bind_value(
            &schema,
            &bag(&[("name", "Ada"), ("contact", r#"{"email":"a@b.c"}"#)]),
        )
        .expect("bind inline");
        assert_eq!(inline["contact"]["email"], "a@b.c");
    }

    /// **Scenario**: Arrays over objects bind from indexed dotted keys.
    #[test]
    fn bind_array_of_objects_from_indexed_keys() {
        let schema = Schema::new("cart").property(Property::array(
            "items",
            Property::object(
                "item",
                vec![Property::string("sku").required(), Property::integer("qty")],
            ),
        ));
        let value = bind_value(
            &schema,
            &bag(&[
                ("items.0.sku", "A-1"),
                ("items.0.qty", "2"),
                ("items.1.sku", "B-9"),
            ]),
        )
        .expect("bind");
        assert_eq!(value["items"][0]["sku"], "A-1");
        assert_eq!(value["items"][0]["qty"], 2);
        assert_eq!(value["items"][1]["sku"], "B-9");
    }

    /// **Scenario**: extract ∘ bind is the identity on the property bag for
    /// supported types, and null fields are omitted on extract.
    #[test]
    fn extract_bind_roundtrip() {
        let schema = booking_schema();
        let input = bag(&[
            ("name", "Ada"),
            ("seats", "2"),
            ("window", "false"),
            ("class", "economy"),
            ("contact.email", "a@b.c"),
            ("tags", r#"["x","y"]"#),
        ]);
        let value = bind_value(&schema, &input).expect("bind");
        let output = extract_value(&schema, &value);
        assert_eq!(output, input);
    }

    /// **Scenario**: Arrays over objects extract to indexed dotted keys that
    /// bind back to the same record.
    #[test]
    fn array_of_objects_roundtrip_via_indexed_keys() {
        let schema = Schema::new("cart").property(Property::array(
            "items",
            Property::object("item", vec![Property::string("sku"), Property::integer("qty")]),
        ));
        let record = serde_json::json!({
            "items": [ { "sku": "A-1", "qty": 2 }, { "sku": "B-9", "qty": 1 } ]
        });
        let flat = extract_value(&schema, &record);
        assert_eq!(flat.get("items.0.sku"), Some(&"A-1".to_string()));
        assert_eq!(flat.get("items.1.qty"), Some(&"1".to_string()));
        let back = bind_value(&schema, &flat).expect("bind");
        assert_eq!(back, record);
    }

    /// **Scenario**: A multi-select enum binds a list of symbols and rejects
    /// foreign symbols.
    #[test]
    fn multi_select_enum_binds_symbol_list() {
        let schema = Schema::new("prefs")
            .property(Property::enumeration("days", ["mon", "tue", "wed"]).multi_select());
        let value =
            bind_value(&schema, &bag(&[("days", "mon, wed")])).expect("bind");
        assert_eq!(value["days"], serde_json::json!(["mon", "wed"]));

        let err = bind_value(&schema, &bag(&[("days", "mon, fri")])).unwrap_err();
        assert!(matches!(err, SchemaError::Bind { .. }));
    }
}
