//! The constrained license browse query language.
//!
//! A query is `{relationship, limit, offset, order_by, criteria}` where each
//! criterion is `{field, operator, value}`. Fields and operators are
//! whitelisted and every value is type-checked before any SQL is built, so
//! raw caller input never reaches the storage layer.
//!
//! Known limitation, kept on purpose: `relationship` applies uniformly to
//! all criteria in one query. Mixed AND/OR logic across different criteria
//! pairs is not expressible.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Every queryable license attribute, also the whitelist for `order_by`.
pub const LICENSE_FIELDS: &[&str] = &[
    "id",
    "license_key",
    "max_allowed_domains",
    "allowed_domains",
    "status",
    "owner_name",
    "email",
    "company_name",
    "txn_id",
    "date_created",
    "date_renewed",
    "date_expiry",
    "package_slug",
    "package_type",
    "hmac_key",
    "crypto_key",
    "data",
];

pub const OPERATORS: &[&str] = &[
    "=",
    "!=",
    ">",
    "<",
    ">=",
    "<=",
    "BETWEEN",
    "NOT BETWEEN",
    "IN",
    "NOT IN",
    "LIKE",
    "NOT LIKE",
];

const QUERY_KEYS: &[&str] = &["relationship", "limit", "offset", "order_by", "criteria"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    And,
    Or,
}

impl Relationship {
    fn keyword(self) -> &'static str {
        match self {
            Relationship::And => "AND",
            Relationship::Or => "OR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Criterion {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

/// A validated browse query, ready to be turned into SQL.
#[derive(Debug, Clone)]
pub struct BrowseQuery {
    pub relationship: Relationship,
    pub limit: i64,
    pub offset: i64,
    pub order_by: String,
    pub criteria: Vec<Criterion>,
}

impl Default for BrowseQuery {
    fn default() -> Self {
        Self {
            relationship: Relationship::And,
            limit: 999,
            offset: 0,
            order_by: "date_created".to_string(),
            criteria: Vec::new(),
        }
    }
}

impl BrowseQuery {
    /// Parses and validates a raw JSON query. Returns a human-readable
    /// message on the first violation; nothing touches storage on failure.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let Value::Object(map) = raw else {
            return Err("The query must be an object.".to_string());
        };

        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !QUERY_KEYS.contains(k))
            .collect();

        if !unknown.is_empty() {
            return Err(format!(
                "Invalid keys: {}. The following keys are valid: {}",
                unknown.join(", "),
                QUERY_KEYS.join(", ")
            ));
        }

        let mut query = BrowseQuery::default();

        match map.get("relationship") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s == "AND" => query.relationship = Relationship::And,
            Some(Value::String(s)) if s == "OR" => query.relationship = Relationship::Or,
            Some(Value::String(s)) if s.is_empty() => {}
            Some(_) => {
                return Err(
                    "Invalid relationship operator. Only \"AND\" and \"OR\" are allowed."
                        .to_string(),
                );
            }
        }

        if let Some(limit) = map.get("limit") {
            query.limit = parse_integer(limit).ok_or("The limit must be an integer.")?;
        }

        if let Some(offset) = map.get("offset") {
            let offset =
                parse_integer(offset).ok_or("The offset must be a positive integer.")?;
            if offset < 0 {
                return Err("The offset must be a positive integer.".to_string());
            }
            query.offset = offset;
        }

        match map.get("order_by") {
            None | Some(Value::Null) => {}
            Some(Value::String(field)) if LICENSE_FIELDS.contains(&field.as_str()) => {
                query.order_by = field.clone();
            }
            Some(_) => {
                return Err(format!(
                    "Invalid order_by field. The following values are valid: {}",
                    LICENSE_FIELDS.join(", ")
                ));
            }
        }

        match map.get("criteria") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    query.criteria.push(parse_criterion(item)?);
                }
            }
            Some(_) => return Err("The criteria must be an array.".to_string()),
        }

        Ok(query)
    }

    /// Builds the WHERE/ORDER BY/LIMIT tail of the browse statement along
    /// with its positional parameters. Field and operator strings were
    /// whitelist-checked during parsing, so interpolating them is safe.
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from("WHERE 1 = 1");
        let mut params: Vec<SqlValue> = Vec::new();

        for crit in &self.criteria {
            sql.push(' ');
            sql.push_str(self.relationship.keyword());
            sql.push(' ');
            sql.push_str(&crit.field);
            sql.push(' ');

            match crit.operator.as_str() {
                "IN" | "NOT IN" => {
                    let values = crit.value.as_array().map(Vec::as_slice).unwrap_or(&[]);
                    let placeholders = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!("{} ({})", crit.operator, placeholders));
                    for v in values {
                        params.push(to_sql_value(v));
                    }
                }
                "BETWEEN" | "NOT BETWEEN" => {
                    sql.push_str(&format!("{} ? AND ?", crit.operator));
                    let values = crit.value.as_array().map(Vec::as_slice).unwrap_or(&[]);
                    for v in values {
                        params.push(to_sql_value(v));
                    }
                }
                op => {
                    sql.push_str(op);
                    sql.push_str(" ?");
                    params.push(to_sql_value(&crit.value));
                }
            }
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by);

        if self.limit > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(self.limit));
            params.push(SqlValue::Integer(self.offset));
        }

        (sql, params)
    }
}

fn parse_criterion(item: &Value) -> Result<Criterion, String> {
    let required = format!(
        "Invalid criteria. The following keys are required: operator, value, field. \
         The following values are valid for the operator: {}",
        OPERATORS.join(", ")
    );

    let Value::Object(map) = item else {
        return Err(required);
    };

    let field = map.get("field").and_then(Value::as_str).unwrap_or("");
    let operator = map.get("operator").and_then(Value::as_str).unwrap_or("");
    let value = map.get("value").cloned().unwrap_or(Value::Null);

    if field.is_empty() || operator.is_empty() || value.is_null() {
        return Err(required);
    }

    if !OPERATORS.contains(&operator) {
        return Err(format!(
            "Invalid operator. The following values are valid: {}",
            OPERATORS.join(", ")
        ));
    }

    if !LICENSE_FIELDS.contains(&field) {
        return Err(format!(
            "Invalid field. The following values are valid: {}",
            LICENSE_FIELDS.join(", ")
        ));
    }

    match operator {
        "BETWEEN" | "NOT BETWEEN" => {
            let ok = value.as_array().is_some_and(|v| v.len() == 2);
            if !ok {
                return Err(
                    "The value for the BETWEEN operator must be an array with two elements."
                        .to_string(),
                );
            }
        }
        "IN" | "NOT IN" => match value.as_array() {
            None => {
                return Err(
                    "The value for the IN and NOT IN operators must be an array.".to_string()
                );
            }
            Some(values) if values.is_empty() => {
                return Err(
                    "The value for the IN and NOT IN operators must not be empty.".to_string(),
                );
            }
            Some(_) => {}
        },
        _ => {
            if value.is_array() || value.is_object() {
                return Err("The value must be a scalar for all operators except BETWEEN, \
                     NOT BETWEEN, IN, and NOT IN operators."
                    .to_string());
            }
        }
    }

    Ok(Criterion {
        field: field.to_string(),
        operator: operator.to_string(),
        value,
    })
}

// Accepts JSON numbers and numeric strings, like form-encoded input.
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if s.is_empty() => Some(0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(0),
        _ => None,
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Number(n) if n.is_i64() => SqlValue::Integer(n.as_i64().unwrap_or(0)),
        Value::Number(n) => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
