use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::classfile::AnnotationInfo;
use crate::ir::{ClassDef, MethodDef};
use crate::results::{ClassResult, HttpMethod, MethodResult, ParamKind, ParameterBinding};
use crate::types::{TypeRef, parameter_types};

/// Recognized JAX-RS annotation namespaces, old and new.
const WS_RS_PREFIXES: [&str; 2] = ["javax/ws/rs/", "jakarta/ws/rs/"];

/// Simple name of a JAX-RS annotation, namespace-independent.
fn ws_rs_name(type_name: &str) -> Option<&str> {
    WS_RS_PREFIXES
        .iter()
        .find_map(|prefix| type_name.strip_prefix(prefix))
}

/// Outcome of extracting one method's annotations.
pub(crate) enum MethodExtraction {
    /// Endpoint or sub-resource locator skeleton, not yet simulated.
    Candidate(MethodResult),
    /// No JAX-RS metadata; not part of the resource surface.
    NotResource,
    /// Recognized annotation with unimplemented semantics; the method is
    /// excluded from the model (the run continues).
    Unsupported(String),
}

/// Extracts a top-level resource class. Returns `None` when the class
/// carries no class-level `@Path`.
pub(crate) fn extract_class(class: &ClassDef) -> Option<ClassResult> {
    let path = class_path(class)?;
    let mut result = extract_methods(class);
    result.path = Some(path);
    Some(result)
}

/// Extracts a sub-resource class: same pass, but no class-level `@Path` is
/// required because the locator supplies the path prefix.
pub(crate) fn extract_sub_resource(class: &ClassDef) -> ClassResult {
    extract_methods(class)
}

fn extract_methods(class: &ClassDef) -> ClassResult {
    let mut result = ClassResult::new(&class.name);
    for annotation in &class.annotations {
        match ws_rs_name(&annotation.type_name) {
            Some("Consumes") => result.consumes.extend(annotation.string_values()),
            Some("Produces") => result.produces.extend(annotation.string_values()),
            _ => {}
        }
    }

    for method in &class.methods {
        match extract_method(class, method) {
            MethodExtraction::Candidate(mut method_result) => {
                // Class-level media types apply where the method has none.
                if method_result.consumes.is_empty() {
                    method_result.consumes = result.consumes.clone();
                }
                if method_result.produces.is_empty() {
                    method_result.produces = result.produces.clone();
                }
                result.methods.push(method_result);
            }
            MethodExtraction::NotResource => {}
            MethodExtraction::Unsupported(reason) => {
                warn!(
                    class = %class.name,
                    method = %method.name,
                    "method excluded from the model: {reason}"
                );
            }
        }
    }
    result
}

/// Copies JAX-RS method and parameter annotations down from superclasses
/// and implemented interfaces present in the project, for methods that
/// carry none themselves. JAX-RS resolves annotations the same way at
/// runtime, so interface-driven resource definitions stay visible.
pub(crate) fn with_inherited_annotations(
    class: &ClassDef,
    classes: &BTreeMap<String, ClassDef>,
) -> ClassDef {
    let mut enriched = class.clone();
    for method in &mut enriched.methods {
        if !method.is_public || method.is_static || method.name.starts_with('<') {
            continue;
        }
        if has_ws_rs_metadata(method) {
            continue;
        }
        if let Some(parent) =
            find_annotated_ancestor(class, &method.name, &method.descriptor, classes)
        {
            method.annotations = parent.annotations.clone();
            method.parameter_annotations = parent.parameter_annotations.clone();
        }
    }
    enriched
}

fn has_ws_rs_metadata(method: &MethodDef) -> bool {
    method
        .annotations
        .iter()
        .any(|annotation| ws_rs_name(&annotation.type_name).is_some())
        || method
            .parameter_annotations
            .iter()
            .flatten()
            .any(|annotation| ws_rs_name(&annotation.type_name).is_some())
}

fn find_annotated_ancestor<'a>(
    class: &ClassDef,
    name: &str,
    descriptor: &str,
    classes: &'a BTreeMap<String, ClassDef>,
) -> Option<&'a MethodDef> {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut seen = BTreeSet::new();
    queue.extend(class.super_name.iter().cloned());
    queue.extend(class.interfaces.iter().cloned());
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let Some(ancestor) = classes.get(&current) else {
            continue;
        };
        if let Some(method) = ancestor
            .methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
        {
            if has_ws_rs_metadata(method) {
                return Some(method);
            }
        }
        queue.extend(ancestor.super_name.iter().cloned());
        queue.extend(ancestor.interfaces.iter().cloned());
    }
    None
}

/// Class-level `@Path` value, if present.
pub(crate) fn class_path(class: &ClassDef) -> Option<String> {
    class.annotations.iter().find_map(|annotation| {
        if ws_rs_name(&annotation.type_name) == Some("Path") {
            annotation.string_value().map(str::to_string)
        } else {
            None
        }
    })
}

/// `@ApplicationPath` value on a JAX-RS application subclass.
pub(crate) fn application_path(class: &ClassDef) -> Option<String> {
    class.annotations.iter().find_map(|annotation| {
        if ws_rs_name(&annotation.type_name) == Some("ApplicationPath") {
            annotation.string_value().map(str::to_string)
        } else {
            None
        }
    })
}

/// Builds the metadata skeleton for one method, without running the
/// simulator. A method with a recognized verb becomes an endpoint; one with
/// `@Path` but no verb becomes a sub-resource locator.
pub(crate) fn extract_method(class: &ClassDef, method: &MethodDef) -> MethodExtraction {
    if method.name == "<init>" || method.name == "<clinit>" || method.is_static
        || !method.is_public
    {
        return MethodExtraction::NotResource;
    }

    let mut result = MethodResult::new(&method.name, &method.descriptor);
    for annotation in &method.annotations {
        let Some(name) = ws_rs_name(&annotation.type_name) else {
            continue;
        };
        if let Some(verb) = HttpMethod::from_annotation(name) {
            result.http_method = Some(verb);
            continue;
        }
        match name {
            "Path" => result.path = annotation.string_value().map(str::to_string),
            "Consumes" => result.consumes.extend(annotation.string_values()),
            "Produces" => result.produces.extend(annotation.string_values()),
            _ => {}
        }
    }

    if result.http_method.is_none() && result.path.is_none() {
        return MethodExtraction::NotResource;
    }

    match extract_parameters(class, method, &mut result) {
        Ok(()) => {}
        Err(reason) => return MethodExtraction::Unsupported(reason),
    }

    if result.is_sub_resource_locator() {
        // Populated by recursive expansion once the simulator has narrowed
        // the locator's possible target classes.
        result.sub_resource = Some(ClassResult::new(""));
    }

    MethodExtraction::Candidate(result)
}

/// Parameter disposition after annotation dispatch.
enum ParamRole {
    Bound,
    Injected,
    Unannotated,
}

fn extract_parameters(
    class: &ClassDef,
    method: &MethodDef,
    result: &mut MethodResult,
) -> Result<(), String> {
    let Ok(param_types) = parameter_types(&method.descriptor) else {
        return Ok(());
    };

    let mut roles = Vec::with_capacity(param_types.len());
    for (index, param_type) in param_types.iter().enumerate() {
        let annotations = method
            .parameter_annotations
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        roles.push(dispatch_parameter(annotations, param_type.clone(), result)?);
    }

    let unannotated: Vec<usize> = roles
        .iter()
        .enumerate()
        .filter_map(|(index, role)| matches!(role, ParamRole::Unannotated).then_some(index))
        .collect();
    if unannotated.len() > 1 {
        warn!(
            class = %class.name,
            method = %method.name,
            "ambiguous request body: {} unannotated parameters, using the first",
            unannotated.len()
        );
    }
    if let Some(first) = unannotated.first() {
        result.request_body = param_types.get(*first).cloned();
        debug!(
            class = %class.name,
            method = %method.name,
            "inferred request body parameter at index {first}"
        );
    }
    Ok(())
}

fn dispatch_parameter(
    annotations: &[AnnotationInfo],
    param_type: TypeRef,
    result: &mut MethodResult,
) -> Result<ParamRole, String> {
    let mut binding: Option<(ParamKind, String)> = None;
    let mut default_value = None;
    let mut injected = false;

    for annotation in annotations {
        let Some(name) = ws_rs_name(&annotation.type_name) else {
            continue;
        };
        let kind = match name {
            "PathParam" => Some(ParamKind::Path),
            "QueryParam" => Some(ParamKind::Query),
            "HeaderParam" => Some(ParamKind::Header),
            "FormParam" => Some(ParamKind::Form),
            "CookieParam" => Some(ParamKind::Cookie),
            "MatrixParam" => Some(ParamKind::Matrix),
            "DefaultValue" => {
                default_value = annotation.string_value().map(str::to_string);
                None
            }
            "core/Context" | "BeanParam" => {
                injected = true;
                None
            }
            "container/Suspended" => {
                return Err("@Suspended asynchronous response binding is not supported".to_string());
            }
            _ => None,
        };
        if let Some(kind) = kind {
            let name = annotation.string_value().unwrap_or_default().to_string();
            binding = Some((kind, name));
        }
    }

    if let Some((kind, name)) = binding {
        result.parameters.push(ParameterBinding {
            kind,
            name,
            type_ref: param_type,
            default_value,
        });
        return Ok(ParamRole::Bound);
    }
    if injected {
        return Ok(ParamRole::Injected);
    }
    Ok(ParamRole::Unannotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{ClassFileBuilder, ElementValue};

    fn lower(builder: ClassFileBuilder) -> ClassDef {
        let bytes = builder.finish();
        let class = crate::classfile::parse(&bytes).expect("parse class");
        crate::ir::lower_class(class)
    }

    fn method<'a>(class: &'a ClassDef, name: &str) -> &'a MethodDef {
        class
            .methods
            .iter()
            .find(|method| method.name == name)
            .expect("method present")
    }

    #[test]
    fn verb_and_path_build_endpoint_skeleton() {
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
        let path = builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("{id}"))]);
        builder
            .method("get", "()Ljava/lang/String;")
            .annotation(get)
            .annotation(path)
            .code(vec![0xb1], 1)
            .add();
        let class = lower(builder);

        let MethodExtraction::Candidate(result) = extract_method(&class, method(&class, "get"))
        else {
            panic!("expected candidate");
        };

        assert_eq!(result.http_method, Some(HttpMethod::Get));
        assert_eq!(result.path.as_deref(), Some("{id}"));
        assert!(!result.is_sub_resource_locator());
    }

    #[test]
    fn path_without_verb_is_sub_resource_locator() {
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let path = builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("sub"))]);
        builder
            .method("sub", "()Lcom/example/Sub;")
            .annotation(path)
            .code(vec![0xb1], 1)
            .add();
        let class = lower(builder);

        let MethodExtraction::Candidate(result) = extract_method(&class, method(&class, "sub"))
        else {
            panic!("expected candidate");
        };

        assert!(result.is_sub_resource_locator());
        assert!(result.sub_resource.is_some());
    }

    #[test]
    fn single_unannotated_parameter_becomes_request_body() {
        // Three parameters, body parameter second: inference must not depend
        // on declaration order.
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let post = builder.annotation("Ljavax/ws/rs/POST;", &[]);
        let query = builder.annotation(
            "Ljavax/ws/rs/QueryParam;",
            &[("value", ElementValue::Str("q"))],
        );
        let header = builder.annotation(
            "Ljavax/ws/rs/HeaderParam;",
            &[("value", ElementValue::Str("h"))],
        );
        builder
            .method(
                "create",
                "(Ljava/lang/String;Lcom/example/Payload;Ljava/lang/String;)V",
            )
            .annotation(post)
            .parameter_annotations(vec![vec![query], Vec::new(), vec![header]])
            .code(vec![0xb1], 4)
            .add();
        let class = lower(builder);

        let MethodExtraction::Candidate(result) = extract_method(&class, method(&class, "create"))
        else {
            panic!("expected candidate");
        };

        assert_eq!(
            result.request_body.as_ref().map(|t| t.name().to_string()),
            Some("com/example/Payload".to_string())
        );
        assert_eq!(result.parameters.len(), 2);
    }

    #[test]
    fn suspended_parameter_excludes_method() {
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
        let suspended = builder.annotation("Ljavax/ws/rs/container/Suspended;", &[]);
        builder
            .method("async", "(Ljavax/ws/rs/container/AsyncResponse;)V")
            .annotation(get)
            .parameter_annotations(vec![vec![suspended]])
            .code(vec![0xb1], 2)
            .add();
        let class = lower(builder);

        assert!(matches!(
            extract_method(&class, method(&class, "async")),
            MethodExtraction::Unsupported(_)
        ));
    }

    #[test]
    fn ambiguous_body_takes_first_unannotated() {
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let post = builder.annotation("Ljavax/ws/rs/POST;", &[]);
        builder
            .method("create", "(Lcom/example/First;Lcom/example/Second;)V")
            .annotation(post)
            .parameter_annotations(vec![Vec::new(), Vec::new()])
            .code(vec![0xb1], 3)
            .add();
        let class = lower(builder);

        let MethodExtraction::Candidate(result) = extract_method(&class, method(&class, "create"))
        else {
            panic!("expected candidate");
        };

        assert_eq!(
            result.request_body.as_ref().map(|t| t.name().to_string()),
            Some("com/example/First".to_string())
        );
    }

    #[test]
    fn class_media_types_are_inherited_by_methods() {
        let mut builder = ClassFileBuilder::new("com/example/Items", "java/lang/Object");
        let class_path =
            builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("items"))]);
        let produces = builder.annotation(
            "Ljavax/ws/rs/Produces;",
            &[(
                "value",
                ElementValue::List(vec![ElementValue::Str("application/json")]),
            )],
        );
        builder.class_annotation(class_path);
        builder.class_annotation(produces);
        let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
        builder
            .method("list", "()Ljava/lang/String;")
            .annotation(get)
            .code(vec![0xb1], 1)
            .add();
        let class = lower(builder);

        let result = extract_class(&class).expect("resource class");

        assert_eq!(result.path.as_deref(), Some("items"));
        let method_result = result.methods.first().expect("one method");
        assert!(method_result.produces.contains("application/json"));
    }
}
