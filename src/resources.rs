//! Final resource tree: normalized paths keyed by verb, with synthesized
//! default responses where simulation observed none, ready for JSON output.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::elements::{Element, HttpResponse, JsonValue, Value, dedup_shapes};
use crate::results::{ClassResult, HttpMethod, MethodResult, ParamKind};
use crate::types::{self, TypeRef};

/// Reconstructed REST surface of one deployment unit.
#[derive(Debug, Serialize)]
pub(crate) struct Resources {
    pub(crate) base_path: String,
    /// Normalized resource path to verb to endpoint description.
    pub(crate) paths: BTreeMap<String, BTreeMap<HttpMethod, ResourceMethod>>,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct ResourceMethod {
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub(crate) consumes: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub(crate) produces: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) path_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) query_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) header_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) form_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) cookie_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) matrix_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub(crate) request_body: BTreeSet<String>,
    pub(crate) responses: Vec<ResponseView>,
}

/// One possible response of an endpoint, flattened for output.
#[derive(Debug, Serialize)]
pub(crate) struct ResponseView {
    pub(crate) statuses: BTreeSet<u16>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub(crate) entity_types: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) inline_entities: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) headers: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Builds the resource tree from the per-class analysis results. Endpoints
/// that land on the same path and verb, including through different locator
/// chains, are unioned into one entry.
pub(crate) fn interpret(class_results: &[ClassResult], base_path: &str) -> Resources {
    let mut paths: BTreeMap<String, BTreeMap<HttpMethod, ResourceMethod>> = BTreeMap::new();
    for class_result in class_results {
        let prefix = normalize_path(class_result.path.as_deref().unwrap_or(""));
        collect_class(class_result, &prefix, &mut paths);
    }
    Resources {
        base_path: ensure_leading_slash(&normalize_path(base_path)),
        paths,
    }
}

fn collect_class(
    class_result: &ClassResult,
    prefix: &str,
    paths: &mut BTreeMap<String, BTreeMap<HttpMethod, ResourceMethod>>,
) {
    for method in &class_result.methods {
        let path = join_paths(prefix, method.path.as_deref().unwrap_or(""));
        match method.http_method {
            Some(verb) => {
                let view = build_view(method);
                let entry = paths
                    .entry(ensure_leading_slash(&path))
                    .or_default()
                    .entry(verb)
                    .or_default();
                merge_views(entry, view);
            }
            None => {
                if let Some(sub) = &method.sub_resource {
                    collect_class(sub, &path, paths);
                }
            }
        }
    }
}

/// Collapses duplicate slashes and strips the edges; `""` stays empty.
pub(crate) fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn join_paths(prefix: &str, suffix: &str) -> String {
    let prefix = normalize_path(prefix);
    let suffix = normalize_path(suffix);
    match (prefix.is_empty(), suffix.is_empty()) {
        (true, true) => String::new(),
        (true, false) => suffix,
        (false, true) => prefix,
        (false, false) => format!("{prefix}/{suffix}"),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    format!("/{path}")
}

fn build_view(method: &MethodResult) -> ResourceMethod {
    let mut view = ResourceMethod {
        consumes: method.consumes.clone(),
        produces: method.produces.clone(),
        request_body: method
            .request_body
            .iter()
            .map(TypeRef::display_name)
            .collect(),
        ..ResourceMethod::default()
    };
    for binding in &method.parameters {
        let group = match binding.kind {
            ParamKind::Path => &mut view.path_params,
            ParamKind::Query => &mut view.query_params,
            ParamKind::Header => &mut view.header_params,
            ParamKind::Form => &mut view.form_params,
            ParamKind::Cookie => &mut view.cookie_params,
            ParamKind::Matrix => &mut view.matrix_params,
        };
        let mut display = binding.type_ref.display_name();
        if let Some(default) = &binding.default_value {
            display = format!("{display} (default: {default})");
        }
        group.insert(binding.name.clone(), display);
    }

    let mut responses = method.responses.clone();
    if responses.is_empty() {
        responses.extend(default_response(&method.descriptor));
    }
    view.responses = responses.iter().map(render_response).collect();
    view
}

/// Fallback outcome when the simulation saw no explicit response: 204 for
/// void methods, 200 with the declared return type otherwise. A method
/// declared to return `Response` whose body never reaches a builder (for
/// example one that always throws) has no successful outcome to report.
fn default_response(descriptor: &str) -> Option<HttpResponse> {
    let mut response = HttpResponse::default();
    match types::return_type(descriptor) {
        Ok(Some(declared)) => {
            if declared.is_response() {
                return None;
            }
            response.statuses.insert(200);
            response.entity_types.insert(declared);
        }
        _ => {
            response.statuses.insert(204);
        }
    }
    Some(response)
}

fn merge_views(existing: &mut ResourceMethod, incoming: ResourceMethod) {
    existing.consumes.extend(incoming.consumes);
    existing.produces.extend(incoming.produces);
    for (group, incoming_group) in [
        (&mut existing.path_params, incoming.path_params),
        (&mut existing.query_params, incoming.query_params),
        (&mut existing.header_params, incoming.header_params),
        (&mut existing.form_params, incoming.form_params),
        (&mut existing.cookie_params, incoming.cookie_params),
        (&mut existing.matrix_params, incoming.matrix_params),
    ] {
        group.extend(incoming_group);
    }
    existing.request_body.extend(incoming.request_body);
    for response in incoming.responses {
        if !existing.responses.iter().any(|known| same_view(known, &response)) {
            existing.responses.push(response);
        }
    }
}

fn same_view(a: &ResponseView, b: &ResponseView) -> bool {
    a.statuses == b.statuses
        && a.entity_types == b.entity_types
        && a.inline_entities == b.inline_entities
        && a.headers == b.headers
}

fn render_response(response: &HttpResponse) -> ResponseView {
    let inline = dedup_shapes(&response.inline_entities);
    ResponseView {
        statuses: response.statuses.clone(),
        entity_types: response
            .entity_types
            .iter()
            .map(TypeRef::display_name)
            .collect(),
        inline_entities: inline.iter().map(render_json).collect(),
        headers: response
            .headers
            .iter()
            .map(|(name, values)| {
                (name.clone(), values.iter().map(render_value).collect())
            })
            .collect(),
    }
}

fn render_json(shape: &JsonValue) -> serde_json::Value {
    match shape {
        JsonValue::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, element)| (name.clone(), render_element(element)))
                .collect(),
        ),
        JsonValue::Array(inner) => {
            if inner.is_indeterminate() {
                serde_json::Value::Array(Vec::new())
            } else {
                serde_json::Value::Array(vec![render_element(inner)])
            }
        }
    }
}

/// Example rendering of one element: a nested shape when one was inferred, a
/// single concrete value when exactly one was observed, otherwise a
/// placeholder derived from the static type.
fn render_element(element: &Element) -> serde_json::Value {
    let shapes: Vec<&JsonValue> = element
        .possible_values
        .iter()
        .filter_map(|value| match value {
            Value::Json(shape) => Some(shape),
            _ => None,
        })
        .collect();
    if let Some(shape) = shapes.first() {
        return render_json(shape);
    }

    let concrete: Vec<serde_json::Value> = element
        .possible_values
        .iter()
        .filter_map(render_plain)
        .collect();
    match concrete.len() {
        1 => concrete.into_iter().next().unwrap_or(serde_json::Value::Null),
        _ => element
            .types
            .first()
            .map(type_placeholder)
            .unwrap_or(serde_json::Value::Null),
    }
}

fn render_plain(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Str(text) => Some(serde_json::Value::String(text.clone())),
        Value::Int(number) => Some(serde_json::Value::Number((*number).into())),
        Value::Null => Some(serde_json::Value::Null),
        _ => None,
    }
}

fn render_value(value: &Value) -> serde_json::Value {
    render_plain(value).unwrap_or(serde_json::Value::Null)
}

fn type_placeholder(type_ref: &TypeRef) -> serde_json::Value {
    match type_ref.name() {
        "int" | "long" | "short" | "byte" | "char" => serde_json::Value::Number(0.into()),
        "boolean" => serde_json::Value::Bool(false),
        "double" | "float" => serde_json::Value::String("number".to_string()),
        name if name == crate::types::STRING => {
            serde_json::Value::String("string".to_string())
        }
        _ => serde_json::Value::String(type_ref.display_name()),
    }
}
