//! Top-level analysis: finds the resource classes, simulates their methods,
//! expands sub-resource locators, and hands the per-class results to the
//! resource-tree interpreter.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::annotations;
use crate::elements::{HttpResponse, Value};
use crate::ir::ClassDef;
use crate::pool::{AnalysisContext, ProjectMethod};
use crate::resources::{self, Resources};
use crate::results::{ClassResult, MethodResult};
use crate::simulate;
use crate::types::{self, OBJECT, TypeRef};

/// Analyzes one set of project classes and returns the reconstructed REST
/// surface. All run state lives in a fresh [`AnalysisContext`], so repeated
/// calls over the same classes yield identical results.
pub(crate) fn analyze(classes: Vec<ClassDef>) -> Resources {
    let base_path = classes
        .iter()
        .find_map(annotations::application_path)
        .unwrap_or_default();

    let ctx = AnalysisContext::new(classes);

    let root_names: Vec<&String> = ctx
        .classes
        .values()
        .filter(|class| annotations::class_path(class).is_some())
        .map(|class| &class.name)
        .collect();
    info!(
        classes = ctx.classes.len(),
        resources = root_names.len(),
        "starting resource analysis"
    );

    let class_results: Vec<ClassResult> = root_names
        .par_iter()
        .filter_map(|name| {
            let class = ctx.classes.get(*name)?;
            let enriched = annotations::with_inherited_annotations(class, &ctx.classes);
            let mut result = annotations::extract_class(&enriched)?;
            let mut expanding = BTreeSet::new();
            expanding.insert(class.name.clone());
            process_class(&ctx, class, &mut result, &mut expanding);
            Some(result)
        })
        .collect();

    resources::interpret(&class_results, &base_path)
}

/// Simulates every extracted method of one class and recursively expands its
/// sub-resource locators. `expanding` holds the classes on the current
/// locator chain, breaking locator cycles.
fn process_class(
    ctx: &AnalysisContext,
    class: &ClassDef,
    result: &mut ClassResult,
    expanding: &mut BTreeSet<String>,
) {
    for method in &mut result.methods {
        if method.is_sub_resource_locator() {
            expand_locator(ctx, &class.name, method, expanding);
        } else {
            attach_responses(ctx, &class.name, method);
        }
    }
}

/// Simulates the endpoint body and records its possible responses.
///
/// Methods returning something other than `Response` get a synthesized
/// 200 outcome carrying the declared return type, narrowed to the observed
/// element types when the declaration is `Object`. Observed inline shapes
/// additionally keep `java.lang.Object` among the entity types since the
/// concrete class is unknown.
fn attach_responses(ctx: &AnalysisContext, class_name: &str, method: &mut MethodResult) {
    let id = ProjectMethod::new(class_name, &method.method_name, &method.descriptor);
    let Ok(Some(declared)) = types::return_type(&method.descriptor) else {
        // A void endpoint has nothing to simulate for; the interpreter
        // synthesizes its 204 outcome.
        return;
    };

    let element = simulate::simulate(ctx, &id);
    if declared.is_response() {
        method
            .responses
            .extend(element.responses().cloned());
        debug!(
            class = %class_name,
            method = %method.method_name,
            outcomes = method.responses.len(),
            "collected response outcomes"
        );
        return;
    }

    // Builder outcomes reached on some branch still count even when the
    // declared type is a plain value.
    method.responses.extend(element.responses().cloned());

    let mut response = HttpResponse::default();
    response.statuses.insert(200);
    if declared.is_object() {
        response.entity_types.extend(
            element
                .types
                .iter()
                .filter(|type_ref| !type_ref.is_response())
                .cloned(),
        );
        if response.entity_types.is_empty() {
            response.entity_types.insert(declared);
        }
    } else {
        response.entity_types.insert(declared);
    }
    for value in element.plain_values() {
        if let Value::Json(shape) = value {
            response.inline_entities.insert(shape.clone());
        }
    }
    if !response.inline_entities.is_empty() {
        response.entity_types.insert(TypeRef::object(OBJECT));
    }
    method.responses.insert(response);
}

/// Resolves the classes a locator can return and merges their extracted
/// endpoints into the locator's sub-resource slot.
fn expand_locator(
    ctx: &AnalysisContext,
    class_name: &str,
    method: &mut MethodResult,
    expanding: &mut BTreeSet<String>,
) {
    let id = ProjectMethod::new(class_name, &method.method_name, &method.descriptor);
    let element = simulate::simulate(ctx, &id);

    let mut candidates: BTreeSet<String> = element
        .types
        .iter()
        .filter(|type_ref| !type_ref.is_array())
        .map(|type_ref| type_ref.name().to_string())
        .collect();
    for value in element.plain_values() {
        if let Value::ClassLiteral(name) = value {
            candidates.insert(name.clone());
        }
    }
    if let Ok(Some(declared)) = types::return_type(&method.descriptor) {
        if !declared.is_array() {
            candidates.insert(declared.name().to_string());
        }
    }

    let mut merged = ClassResult::new("");
    for candidate in candidates {
        let Some(target) = ctx.classes.get(&candidate) else {
            continue;
        };
        if !expanding.insert(candidate.clone()) {
            debug!(
                class = %class_name,
                method = %method.method_name,
                target = %candidate,
                "locator cycle, skipping nested expansion"
            );
            continue;
        }
        let enriched = annotations::with_inherited_annotations(target, &ctx.classes);
        let mut sub_result = annotations::extract_sub_resource(&enriched);
        process_class(ctx, target, &mut sub_result, expanding);
        expanding.remove(&candidate);

        merged.class_name = sub_result.class_name.clone();
        merged.methods.extend(sub_result.methods);
    }

    if merged.methods.is_empty() {
        warn!(
            class = %class_name,
            method = %method.method_name,
            "sub-resource locator target could not be resolved to a project class"
        );
    }
    method.sub_resource = Some(merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower_class;
    use crate::opcodes;
    use crate::results::HttpMethod;
    use crate::test_harness::{ClassFileBuilder, ElementValue};

    fn class(builder: ClassFileBuilder) -> ClassDef {
        let bytes = builder.finish();
        lower_class(crate::classfile::parse(&bytes).expect("parse class"))
    }

    fn resource_class(name: &str, path: &'static str) -> ClassFileBuilder {
        let mut builder = ClassFileBuilder::new(name, "java/lang/Object");
        let path = builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str(path))]);
        builder.class_annotation(path);
        builder
    }

    #[test]
    fn endpoint_with_constant_body_yields_inline_response() {
        let mut builder = resource_class("com/example/Hello", "hello");
        let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
        let text = builder.add_string("Hello World!");
        builder
            .method("hello", "()Ljava/lang/String;")
            .annotation(get)
            .code(vec![opcodes::LDC, text as u8, opcodes::ARETURN], 1)
            .add();

        let resources = analyze(vec![class(builder)]);

        let view = &resources.paths["/hello"][&HttpMethod::Get];
        assert_eq!(view.responses.len(), 1);
        assert!(view.responses[0].statuses.contains(&200));
        assert!(view.responses[0].entity_types.contains("java.lang.String"));
    }

    #[test]
    fn builder_branch_is_reported_beside_the_declared_default() {
        let mut builder = resource_class("com/example/Mixed", "mixed");
        let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
        let text = builder.add_string("fallback");
        let ok = builder.add_method_ref(
            "javax/ws/rs/core/Response",
            "ok",
            "()Ljavax/ws/rs/core/Response$ResponseBuilder;",
        );
        let build = builder.add_method_ref(
            "javax/ws/rs/core/Response$ResponseBuilder",
            "build",
            "()Ljavax/ws/rs/core/Response;",
        );
        builder
            .method("either", "()Ljava/lang/Object;")
            .annotation(get)
            .code(
                vec![
                    opcodes::ICONST_0,
                    opcodes::IFEQ,
                    0x00,
                    0x06,
                    opcodes::LDC,
                    text as u8,
                    opcodes::ARETURN,
                    opcodes::INVOKESTATIC,
                    (ok >> 8) as u8,
                    (ok & 0xff) as u8,
                    opcodes::INVOKEVIRTUAL,
                    (build >> 8) as u8,
                    (build & 0xff) as u8,
                    opcodes::ARETURN,
                ],
                1,
            )
            .add();

        let resources = analyze(vec![class(builder)]);

        let view = &resources.paths["/mixed"][&HttpMethod::Get];
        assert_eq!(view.responses.len(), 2);
        assert!(view.responses.iter().all(|r| r.statuses.contains(&200)));
        assert!(
            view.responses
                .iter()
                .any(|r| r.entity_types.contains("java.lang.String"))
        );
    }

    #[test]
    fn application_path_becomes_the_base_path() {
        let mut app = ClassFileBuilder::new("com/example/App", "javax/ws/rs/core/Application");
        let app_path = app.annotation(
            "Ljavax/ws/rs/ApplicationPath;",
            &[("value", ElementValue::Str("rest"))],
        );
        app.class_annotation(app_path);

        let mut items = resource_class("com/example/Items", "items");
        let get = items.annotation("Ljavax/ws/rs/GET;", &[]);
        items
            .method("list", "()Ljava/lang/String;")
            .annotation(get)
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let resources = analyze(vec![class(app), class(items)]);

        assert_eq!(resources.base_path, "/rest");
        assert!(resources.paths.contains_key("/items"));
    }

    #[test]
    fn locator_expands_into_the_target_class_endpoints() {
        let mut sub = ClassFileBuilder::new("com/example/Sub", "java/lang/Object");
        let get = sub.annotation("Ljavax/ws/rs/GET;", &[]);
        sub.method("read", "()Ljava/lang/String;")
            .annotation(get)
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let mut root = resource_class("com/example/Items", "items");
        let sub_path =
            root.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("sub"))]);
        root.method("sub", "()Lcom/example/Sub;")
            .annotation(sub_path)
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let resources = analyze(vec![class(root), class(sub)]);

        let view = &resources.paths["/items/sub"][&HttpMethod::Get];
        assert!(view.responses[0].statuses.contains(&200));
    }

    #[test]
    fn self_referencing_locator_terminates() {
        let mut root = resource_class("com/example/Items", "items");
        let sub_path =
            root.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("self"))]);
        root.method("again", "()Lcom/example/Items;")
            .annotation(sub_path)
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let resources = analyze(vec![class(root)]);

        // The locator cannot nest into itself; no endpoint appears at all.
        assert!(!resources.paths.contains_key("/items/self/self"));
    }

    #[test]
    fn interface_annotations_are_inherited_by_the_implementation() {
        let mut api = ClassFileBuilder::new("com/example/Api", "java/lang/Object");
        let get = api.annotation("Ljavax/ws/rs/GET;", &[]);
        api.method("list", "()Ljava/lang/String;").annotation(get).add();

        let mut items = ClassFileBuilder::new("com/example/Items", "java/lang/Object")
            .interface("com/example/Api");
        let path =
            items.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("items"))]);
        items.class_annotation(path);
        items
            .method("list", "()Ljava/lang/String;")
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let resources = analyze(vec![class(api), class(items)]);

        assert!(resources.paths["/items"].contains_key(&HttpMethod::Get));
    }

    #[test]
    fn two_classes_on_one_path_union_their_verbs() {
        let mut first = resource_class("com/example/A", "shared");
        let get = first.annotation("Ljavax/ws/rs/GET;", &[]);
        first
            .method("read", "()Ljava/lang/String;")
            .annotation(get)
            .code(vec![0x01, opcodes::ARETURN], 1)
            .add();

        let mut second = resource_class("com/example/B", "shared");
        let post = second.annotation("Ljavax/ws/rs/POST;", &[]);
        second
            .method("write", "()V")
            .annotation(post)
            .code(vec![opcodes::RETURN], 1)
            .add();

        let resources = analyze(vec![class(first), class(second)]);

        let verbs = &resources.paths["/shared"];
        assert!(verbs.contains_key(&HttpMethod::Get));
        assert!(verbs.contains_key(&HttpMethod::Post));
        assert!(verbs[&HttpMethod::Post].responses[0].statuses.contains(&204));
    }

    #[test]
    fn repeated_runs_over_the_same_classes_are_identical() {
        fn mutually_recursive_resource() -> ClassDef {
            let mut builder = resource_class("com/example/Loop", "loop");
            let get = builder.annotation("Ljavax/ws/rs/GET;", &[]);
            let path_a =
                builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("a"))]);
            let path_b =
                builder.annotation("Ljavax/ws/rs/Path;", &[("value", ElementValue::Str("b"))]);
            let a = builder.add_method_ref(
                "com/example/Loop",
                "a",
                "()Ljavax/ws/rs/core/Response;",
            );
            let b = builder.add_method_ref(
                "com/example/Loop",
                "b",
                "()Ljavax/ws/rs/core/Response;",
            );
            let ok = builder.add_method_ref(
                "javax/ws/rs/core/Response",
                "ok",
                "()Ljavax/ws/rs/core/Response$ResponseBuilder;",
            );
            let build = builder.add_method_ref(
                "javax/ws/rs/core/Response$ResponseBuilder",
                "build",
                "()Ljavax/ws/rs/core/Response;",
            );
            builder
                .method("a", "()Ljavax/ws/rs/core/Response;")
                .annotation(get)
                .annotation(path_a)
                .code(
                    vec![
                        opcodes::INVOKESTATIC,
                        (b >> 8) as u8,
                        (b & 0xff) as u8,
                        opcodes::ARETURN,
                    ],
                    1,
                )
                .add();
            builder
                .method("b", "()Ljavax/ws/rs/core/Response;")
                .annotation(get)
                .annotation(path_b)
                .code(
                    vec![
                        opcodes::ICONST_0,
                        opcodes::IFEQ,
                        0x00,
                        0x07,
                        opcodes::INVOKESTATIC,
                        (a >> 8) as u8,
                        (a & 0xff) as u8,
                        opcodes::ARETURN,
                        opcodes::INVOKESTATIC,
                        (ok >> 8) as u8,
                        (ok & 0xff) as u8,
                        opcodes::INVOKEVIRTUAL,
                        (build >> 8) as u8,
                        (build & 0xff) as u8,
                        opcodes::ARETURN,
                    ],
                    1,
                )
                .add();
            class(builder)
        }

        let first = serde_json::to_value(analyze(vec![mutually_recursive_resource()]))
            .expect("serialize first run");
        let second = serde_json::to_value(analyze(vec![mutually_recursive_resource()]))
            .expect("serialize second run");

        assert_eq!(first, second);
    }
}
