use crate::value::{Record, Value};

/// Result of matching a pattern, borrows both the input and the grammar.
#[derive(Clone, Debug, PartialEq)]
pub enum Capture<'a> {
    /// Zero-width matches and fields with nothing to report.
    Unit,
    Text(&'a str),
    Float(f64),
    Int(i64),
    List(Vec<Capture<'a>>),
    Record(Vec<(&'a str, Capture<'a>)>),
    /// Computed by an action block.
    Value(Value),
}

impl<'a> Capture<'a> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Capture::Unit => "null",
            Capture::Text(_) => "string",
            Capture::Float(_) => "float",
            Capture::Int(_) => "integer",
            Capture::List(_) => "list",
            Capture::Record(_) => "record",
            Capture::Value(a) => a.type_name(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capture<'a>> {
        match self {
            Capture::Record(fields) => fields.iter().find_map(|(n, c)| (*n == name).then_some(c)),
            _ => None,
        }
    }

    /// Copies the capture into an owned value, nothing borrowed from the input survives.
    pub fn to_value(&self) -> Value {
        match self {
            Capture::Unit => Value::Null,
            Capture::Text(a) => Value::Str((*a).to_owned()),
            Capture::Float(a) => Value::Float(*a),
            Capture::Int(a) => Value::Int(*a),
            Capture::List(items) => Value::List(items.iter().map(Capture::to_value).collect()),
            Capture::Record(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(name, capture)| (*name, capture.to_value()))
                    .collect::<Record>(),
            ),
            Capture::Value(a) => a.clone(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Capture::List(items) => {
                Value::List(items.into_iter().map(Capture::into_value).collect())
            }
            Capture::Record(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(name, capture)| (name, capture.into_value()))
                    .collect::<Record>(),
            ),
            Capture::Value(a) => a,
            other => other.to_value(),
        }
    }
}

#[test]
fn test_into_value() {
    let capture = Capture::Record(vec![
        ("name", Capture::Text("Ada")),
        (
            "lines",
            Capture::List(vec![Capture::Text("x"), Capture::Value(Value::Int(1))]),
        ),
    ]);

    let owned = capture.to_value();
    assert_eq!(owned, capture.into_value());

    let record = owned.as_record().unwrap();
    assert_eq!(record.get("name"), Some(&Value::from("Ada")));
    assert_eq!(
        record.get("lines"),
        Some(&Value::List(vec![Value::from("x"), Value::Int(1)]))
    );
}
