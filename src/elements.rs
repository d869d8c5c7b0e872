use std::collections::{BTreeMap, BTreeSet};

use crate::types::TypeRef;

/// Symbolic unit of value tracked by the simulator: every value an expression
/// might hold, plus the static types it could have. Merging two elements is a
/// set union on both components, so it is commutative and associative.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct Element {
    pub(crate) types: BTreeSet<TypeRef>,
    pub(crate) possible_values: BTreeSet<Value>,
}

/// One possible concrete or abstract value inside an element.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Value {
    Str(String),
    Int(i64),
    Null,
    ClassLiteral(String),
    /// Reference to an object under construction, keyed by allocation site.
    Obj(u32),
    /// Resolved JSON-shaped value.
    Json(JsonValue),
    /// Response-builder chain still being assembled.
    Builder(HttpResponse),
    /// Finished response outcome.
    Response(HttpResponse),
}

/// Structural representation of an inferred JSON-shaped value.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum JsonValue {
    Object(BTreeMap<String, Element>),
    Array(Element),
}

/// One possible outcome of a response-builder chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct HttpResponse {
    pub(crate) statuses: BTreeSet<u16>,
    pub(crate) entity_types: BTreeSet<TypeRef>,
    pub(crate) inline_entities: BTreeSet<JsonValue>,
    pub(crate) headers: BTreeMap<String, BTreeSet<Value>>,
}

impl Element {
    /// Element with no known value and no known type, used to break cycles
    /// and to widen loop-carried state.
    pub(crate) fn indeterminate() -> Self {
        Self::default()
    }

    /// "Any value of this type" — empty possible-value set.
    pub(crate) fn of_type(type_ref: TypeRef) -> Self {
        let mut types = BTreeSet::new();
        types.insert(type_ref);
        Self {
            types,
            possible_values: BTreeSet::new(),
        }
    }

    pub(crate) fn with_value(type_ref: TypeRef, value: Value) -> Self {
        let mut element = Self::of_type(type_ref);
        element.possible_values.insert(value);
        element
    }

    pub(crate) fn value_only(value: Value) -> Self {
        let mut element = Self::default();
        element.possible_values.insert(value);
        element
    }

    /// Union of possible values and types; order of operands is irrelevant.
    pub(crate) fn merge(&self, other: &Element) -> Element {
        let mut merged = self.clone();
        merged.types.extend(other.types.iter().cloned());
        merged
            .possible_values
            .extend(other.possible_values.iter().cloned());
        merged
    }

    pub(crate) fn merge_in_place(&mut self, other: &Element) {
        self.types.extend(other.types.iter().cloned());
        self.possible_values
            .extend(other.possible_values.iter().cloned());
    }

    /// Keeps the types but drops all value knowledge.
    pub(crate) fn widened(&self) -> Element {
        Element {
            types: self.types.clone(),
            possible_values: BTreeSet::new(),
        }
    }

    pub(crate) fn is_indeterminate(&self) -> bool {
        self.types.is_empty() && self.possible_values.is_empty()
    }

    pub(crate) fn responses(&self) -> impl Iterator<Item = &HttpResponse> {
        self.possible_values.iter().filter_map(|value| match value {
            Value::Response(response) => Some(response),
            _ => None,
        })
    }

    /// Values that are not response outcomes.
    pub(crate) fn plain_values(&self) -> impl Iterator<Item = &Value> {
        self.possible_values
            .iter()
            .filter(|value| !matches!(value, Value::Response(_) | Value::Builder(_)))
    }
}

impl JsonValue {
    pub(crate) fn empty_object() -> Self {
        JsonValue::Object(BTreeMap::new())
    }

    pub(crate) fn empty_array() -> Self {
        JsonValue::Array(Element::indeterminate())
    }

    /// Canonical structural signature: field-name/field-type mappings,
    /// independent of the concrete values observed.
    pub(crate) fn shape_signature(&self) -> String {
        match self {
            JsonValue::Object(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(name, element)| format!("{name}:{}", element_signature(element)))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
            JsonValue::Array(element) => format!("[{}]", element_signature(element)),
        }
    }
}

fn element_signature(element: &Element) -> String {
    let mut parts: BTreeSet<String> = element
        .types
        .iter()
        .map(|type_ref| type_ref.name().to_string())
        .collect();
    for value in &element.possible_values {
        if let Value::Json(json) = value {
            parts.insert(json.shape_signature());
        }
    }
    parts.into_iter().collect::<Vec<_>>().join("|")
}

/// Collapses structurally identical shapes, keeping the smallest
/// representative per signature. Applying this twice yields the same set.
pub(crate) fn dedup_shapes(shapes: &BTreeSet<JsonValue>) -> BTreeSet<JsonValue> {
    let mut by_signature: BTreeMap<String, &JsonValue> = BTreeMap::new();
    for shape in shapes {
        by_signature.entry(shape.shape_signature()).or_insert(shape);
    }
    by_signature.into_values().cloned().collect()
}
