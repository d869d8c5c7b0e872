use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::elements::HttpResponse;
use crate::types::TypeRef;

/// HTTP verbs recognized on resource methods.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub(crate) fn from_annotation(simple_name: &str) -> Option<Self> {
        let method = match simple_name {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "PATCH" => HttpMethod::Patch,
            _ => return None,
        };
        Some(method)
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resource-method parameter is bound from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub(crate) enum ParamKind {
    Path,
    Query,
    Header,
    Form,
    Cookie,
    Matrix,
}

/// One bound parameter of a resource method.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct ParameterBinding {
    pub(crate) kind: ParamKind,
    pub(crate) name: String,
    pub(crate) type_ref: TypeRef,
    pub(crate) default_value: Option<String>,
}

/// One analyzed endpoint or sub-resource locator.
///
/// A `http_method` of `None` marks a sub-resource locator; its nested
/// endpoints live in `sub_resource` once expansion has run.
#[derive(Clone, Debug)]
pub(crate) struct MethodResult {
    pub(crate) method_name: String,
    pub(crate) descriptor: String,
    pub(crate) http_method: Option<HttpMethod>,
    pub(crate) path: Option<String>,
    pub(crate) consumes: BTreeSet<String>,
    pub(crate) produces: BTreeSet<String>,
    pub(crate) parameters: Vec<ParameterBinding>,
    pub(crate) request_body: Option<TypeRef>,
    pub(crate) responses: BTreeSet<HttpResponse>,
    pub(crate) sub_resource: Option<ClassResult>,
}

impl MethodResult {
    pub(crate) fn new(method_name: &str, descriptor: &str) -> Self {
        Self {
            method_name: method_name.to_string(),
            descriptor: descriptor.to_string(),
            http_method: None,
            path: None,
            consumes: BTreeSet::new(),
            produces: BTreeSet::new(),
            parameters: Vec::new(),
            request_body: None,
            responses: BTreeSet::new(),
            sub_resource: None,
        }
    }

    pub(crate) fn is_sub_resource_locator(&self) -> bool {
        self.http_method.is_none()
    }
}

/// Class-level container of analyzed methods, built fresh per analyzed class
/// and per recursively discovered sub-resource class.
#[derive(Clone, Debug)]
pub(crate) struct ClassResult {
    pub(crate) class_name: String,
    pub(crate) path: Option<String>,
    pub(crate) consumes: BTreeSet<String>,
    pub(crate) produces: BTreeSet<String>,
    pub(crate) methods: Vec<MethodResult>,
}

impl ClassResult {
    pub(crate) fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            path: None,
            consumes: BTreeSet::new(),
            produces: BTreeSet::new(),
            methods: Vec::new(),
        }
    }
}
