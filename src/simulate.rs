//! Symbolic bytecode interpreter. Walks each method's instructions with an
//! abstract operand stack and local table holding [`Element`]s, merging
//! frames at join points and bounding repeated visits so loops terminate.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::elements::{Element, HttpResponse, JsonValue, Value};
use crate::ir::{CallKind, CallSite, Const, MethodDef, Op};
use crate::pool::{AnalysisContext, ProjectMethod};
use crate::types::{self, CLASS, OBJECT, STRING, TypeRef};

/// Maximum visits per instruction offset. At the bound the incoming frame is
/// widened to types only; past it the path is dropped.
const WIDEN_BOUND: u32 = 32;

const BUILDER_TYPES: [&str; 2] = [
    "javax/ws/rs/core/Response$ResponseBuilder",
    "jakarta/ws/rs/core/Response$ResponseBuilder",
];

const STATUS_TYPES: [&str; 2] = [
    "javax/ws/rs/core/Response$Status",
    "jakarta/ws/rs/core/Response$Status",
];

const MEDIA_TYPE_TYPES: [&str; 2] =
    ["javax/ws/rs/core/MediaType", "jakarta/ws/rs/core/MediaType"];

/// Simulates one project method, memoizing the finished result. Cycles are
/// broken through the caller-supplied chain, so concurrent simulations of
/// the same method converge on identical results.
pub(crate) fn simulate(ctx: &AnalysisContext, method: &ProjectMethod) -> Element {
    let mut chain = Vec::new();
    let mut unresolved = BTreeSet::new();
    simulate_with_chain(ctx, method, &mut chain, &mut unresolved)
}

/// `unresolved` collects chain methods whose cycle-break placeholder flowed
/// into the current result. A result that still depends on one after its own
/// entry is removed is an inner approximation of the cycle, not the fixed
/// point, and must not be memoized: which cycle member gets simulated first
/// would otherwise decide what the pool hands to every later caller.
fn simulate_with_chain(
    ctx: &AnalysisContext,
    method: &ProjectMethod,
    chain: &mut Vec<ProjectMethod>,
    unresolved: &mut BTreeSet<ProjectMethod>,
) -> Element {
    if let Some(memoized) = ctx.pool.lookup(method) {
        return memoized;
    }
    if chain.contains(method) {
        debug!(
            class = %method.class_name,
            method = %method.name,
            "recursive invocation, falling back to the declared return type"
        );
        unresolved.insert(method.clone());
        return declared_return(&method.descriptor);
    }
    let Some(def) = ctx.find_method(method) else {
        return declared_return(&method.descriptor);
    };
    if def.is_abstract || def.instructions.is_empty() {
        return declared_return(&method.descriptor);
    }

    chain.push(method.clone());
    let mut inner = BTreeSet::new();
    let result = run(ctx, &method.class_name, def, chain, &mut inner);
    chain.pop();
    inner.remove(method);
    if inner.is_empty() {
        ctx.pool.record(method.clone(), result.clone());
    } else {
        debug!(
            class = %method.class_name,
            method = %method.name,
            "result depends on an unfinished caller, not memoizing"
        );
        unresolved.extend(inner);
    }
    result
}

/// "Any value of the declared return type"; indeterminate for void.
fn declared_return(descriptor: &str) -> Element {
    match types::return_type(descriptor) {
        Ok(Some(type_ref)) => Element::of_type(type_ref),
        _ => Element::indeterminate(),
    }
}

/// Abstract machine state at one program point.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Frame {
    stack: Vec<Element>,
    locals: Vec<Element>,
    heap: BTreeMap<u32, JsonValue>,
}

impl Frame {
    fn push(&mut self, element: Element) {
        self.stack.push(element);
    }

    /// Underflow-tolerant pop; an empty stack yields an indeterminate
    /// element rather than aborting the path.
    fn pop(&mut self) -> Element {
        self.stack.pop().unwrap_or_default()
    }

    fn pop_n(&mut self, count: usize) -> Vec<Element> {
        let mut popped: Vec<Element> = (0..count).map(|_| self.pop()).collect();
        popped.reverse();
        popped
    }

    fn store_local(&mut self, slot: usize, element: Element) {
        if self.locals.len() <= slot {
            self.locals.resize(slot + 1, Element::indeterminate());
        }
        self.locals[slot] = element;
    }

    fn load_local(&self, slot: usize) -> Element {
        self.locals.get(slot).cloned().unwrap_or_default()
    }

    /// Pointwise union with another frame. Returns whether anything changed.
    fn merge_from(&mut self, other: &Frame) -> bool {
        let before = self.clone();
        while self.stack.len() < other.stack.len() {
            self.stack.push(Element::indeterminate());
        }
        for (index, element) in other.stack.iter().enumerate() {
            self.stack[index].merge_in_place(element);
        }
        while self.locals.len() < other.locals.len() {
            self.locals.push(Element::indeterminate());
        }
        for (index, element) in other.locals.iter().enumerate() {
            self.locals[index].merge_in_place(element);
        }
        for (id, shape) in &other.heap {
            match self.heap.get_mut(id) {
                Some(existing) => *existing = merge_json(existing, shape),
                None => {
                    self.heap.insert(*id, shape.clone());
                }
            }
        }
        *self != before
    }

    fn widened(&self) -> Frame {
        Frame {
            stack: self.stack.iter().map(Element::widened).collect(),
            locals: self.locals.iter().map(Element::widened).collect(),
            heap: self.heap.clone(),
        }
    }
}

fn merge_json(a: &JsonValue, b: &JsonValue) -> JsonValue {
    match (a, b) {
        (JsonValue::Object(left), JsonValue::Object(right)) => {
            let mut merged = left.clone();
            for (name, element) in right {
                merged
                    .entry(name.clone())
                    .and_modify(|existing| existing.merge_in_place(element))
                    .or_insert_with(|| element.clone());
            }
            JsonValue::Object(merged)
        }
        (JsonValue::Array(left), JsonValue::Array(right)) => {
            JsonValue::Array(left.merge(right))
        }
        // Conflicting shapes for one allocation site; keep the first.
        _ => a.clone(),
    }
}

fn initial_frame(class_name: &str, method: &MethodDef) -> Frame {
    let mut frame = Frame::default();
    frame.locals = vec![Element::indeterminate(); method.max_locals as usize];
    let mut slot = 0usize;
    if !method.is_static {
        frame.store_local(slot, Element::of_type(TypeRef::object(class_name)));
        slot += 1;
    }
    if let Ok(params) = types::parameter_types(&method.descriptor) {
        for type_ref in params {
            let wide = type_ref.is("long") || type_ref.is("double");
            frame.store_local(slot, Element::of_type(type_ref));
            slot += if wide { 2 } else { 1 };
        }
    }
    frame
}

fn run(
    ctx: &AnalysisContext,
    class_name: &str,
    method: &MethodDef,
    chain: &mut Vec<ProjectMethod>,
    unresolved: &mut BTreeSet<ProjectMethod>,
) -> Element {
    let index_of: BTreeMap<u32, usize> = method
        .instructions
        .iter()
        .enumerate()
        .map(|(index, instruction)| (instruction.offset, index))
        .collect();

    let mut states: BTreeMap<u32, Frame> = BTreeMap::new();
    let mut visits: BTreeMap<u32, u32> = BTreeMap::new();
    let mut worklist: VecDeque<u32> = VecDeque::new();

    let entry_offset = match method.instructions.first() {
        Some(instruction) => instruction.offset,
        None => return Element::indeterminate(),
    };
    states.insert(entry_offset, initial_frame(class_name, method));
    worklist.push_back(entry_offset);

    let mut result = Element::indeterminate();

    while let Some(offset) = worklist.pop_front() {
        let visit = visits.entry(offset).or_insert(0);
        *visit += 1;
        if *visit > WIDEN_BOUND {
            continue;
        }
        let widen = *visit == WIDEN_BOUND;

        let Some(&index) = index_of.get(&offset) else {
            continue;
        };
        let mut frame = match states.get(&offset) {
            Some(frame) if widen => frame.widened(),
            Some(frame) => frame.clone(),
            None => continue,
        };

        let instruction = &method.instructions[index];
        let next_offset = method
            .instructions
            .get(index + 1)
            .map(|instruction| instruction.offset);
        let mut successors: Vec<u32> = Vec::new();

        match &instruction.op {
            Op::PushConst(constant) => frame.push(constant_element(constant)),
            Op::LoadLocal(slot) => {
                let element = frame.load_local(*slot);
                frame.push(element);
            }
            Op::StoreLocal(slot) => {
                let element = frame.pop();
                frame.store_local(*slot, element);
            }
            Op::ArrayLoad => {
                frame.pop(); // index
                let array = frame.pop();
                frame.push(array_element(&array, &frame.heap));
            }
            Op::ArrayStore => {
                let value = frame.pop();
                frame.pop(); // index
                let array = frame.pop();
                for target in obj_ids(&array) {
                    if let Some(JsonValue::Array(inner)) = frame.heap.get_mut(&target) {
                        inner.merge_in_place(&value);
                    }
                }
            }
            Op::Pop(count) => {
                frame.pop_n(*count);
            }
            Op::Dup => {
                let top = frame.pop();
                frame.push(top.clone());
                frame.push(top);
            }
            Op::DupX1 => {
                let a = frame.pop();
                let b = frame.pop();
                frame.push(a.clone());
                frame.push(b);
                frame.push(a);
            }
            Op::DupX2 => {
                let a = frame.pop();
                let b = frame.pop();
                let c = frame.pop();
                frame.push(a.clone());
                frame.push(c);
                frame.push(b);
                frame.push(a);
            }
            Op::Swap => {
                let a = frame.pop();
                let b = frame.pop();
                frame.push(a);
                frame.push(b);
            }
            Op::Arith { pops } => {
                frame.pop_n(*pops);
                frame.push(Element::indeterminate());
            }
            Op::GetStatic(member) => frame.push(static_field_element(member)),
            Op::GetField(member) => frame.push(field_element(&member.descriptor)),
            Op::PutStatic => {
                frame.pop();
            }
            Op::PutField(member) => {
                let value = frame.pop();
                let target = frame.pop();
                for id in obj_ids(&target) {
                    if let Some(JsonValue::Object(fields)) = frame.heap.get_mut(&id) {
                        fields
                            .entry(member.name.clone())
                            .and_modify(|existing| existing.merge_in_place(&value))
                            .or_insert_with(|| value.clone());
                    }
                }
            }
            Op::Invoke(call) => invoke(ctx, call, &mut frame, chain, unresolved),
            Op::New(class) => {
                let shape = if is_collection_class(class) {
                    JsonValue::empty_array()
                } else {
                    JsonValue::empty_object()
                };
                frame.heap.insert(instruction.offset, shape);
                frame.push(Element::with_value(
                    TypeRef::object(class),
                    Value::Obj(instruction.offset),
                ));
            }
            Op::NewArray { element, dims } => {
                frame.pop_n(*dims);
                frame.heap.insert(instruction.offset, JsonValue::empty_array());
                frame.push(Element::with_value(
                    array_type(element.as_deref()),
                    Value::Obj(instruction.offset),
                ));
            }
            Op::Branch {
                targets,
                pops,
                fall_through,
            } => {
                frame.pop_n(*pops);
                successors.extend(targets.iter().copied());
                if !*fall_through {
                    // Unconditional transfer; suppress the textual successor.
                    propagate(&frame, &successors, &mut states, &mut worklist);
                    continue;
                }
            }
            Op::Return { with_value } => {
                if *with_value {
                    let value = frame.pop();
                    result.merge_in_place(&resolve_element(&value, &frame.heap));
                }
                continue;
            }
            Op::Throw => {
                // Exceptional exits contribute nothing to the inferred model.
                continue;
            }
            Op::CheckCast(class) => {
                let mut top = frame.pop();
                let type_ref = if class.starts_with('[') {
                    TypeRef::from_descriptor(class).unwrap_or_else(|_| TypeRef::object(OBJECT))
                } else {
                    TypeRef::object(class)
                };
                top.types.insert(type_ref);
                frame.push(top);
            }
            Op::InstanceOf => {
                frame.pop();
                frame.push(Element::of_type(TypeRef::primitive("boolean")));
            }
            Op::Monitor => {
                frame.pop();
            }
            Op::Nop => {}
        }

        if let Some(next) = next_offset {
            successors.push(next);
        }
        propagate(&frame, &successors, &mut states, &mut worklist);
    }

    result
}

fn propagate(
    frame: &Frame,
    successors: &[u32],
    states: &mut BTreeMap<u32, Frame>,
    worklist: &mut VecDeque<u32>,
) {
    for &successor in successors {
        let changed = match states.get_mut(&successor) {
            Some(existing) => existing.merge_from(frame),
            None => {
                states.insert(successor, frame.clone());
                true
            }
        };
        if changed && !worklist.contains(&successor) {
            worklist.push_back(successor);
        }
    }
}

fn constant_element(constant: &Const) -> Element {
    match constant {
        Const::Str(value) => {
            Element::with_value(TypeRef::object(STRING), Value::Str(value.clone()))
        }
        Const::Int(value) => Element::with_value(TypeRef::primitive("int"), Value::Int(*value)),
        Const::Class(name) => {
            Element::with_value(TypeRef::object(CLASS), Value::ClassLiteral(name.clone()))
        }
        Const::Null => Element::value_only(Value::Null),
        Const::Unknown => Element::indeterminate(),
    }
}

fn field_element(descriptor: &str) -> Element {
    TypeRef::from_descriptor(descriptor)
        .map(Element::of_type)
        .unwrap_or_default()
}

/// Static field reads. `Response.Status` constants and `MediaType` string
/// constants resolve to concrete values so builder chains and media-type
/// arguments stay precise.
fn static_field_element(member: &crate::classfile::MemberRef) -> Element {
    if STATUS_TYPES.contains(&member.owner.as_str()) {
        if let Some(code) = status_code(&member.name) {
            return Element::with_value(
                TypeRef::object(&member.owner),
                Value::Int(i64::from(code)),
            );
        }
    }
    if MEDIA_TYPE_TYPES.contains(&member.owner.as_str()) {
        if let Some(text) = media_type_constant(&member.name) {
            return Element::with_value(
                TypeRef::object(STRING),
                Value::Str(text.to_string()),
            );
        }
    }
    field_element(&member.descriptor)
}

fn status_code(constant: &str) -> Option<u16> {
    let code = match constant {
        "OK" => 200,
        "CREATED" => 201,
        "ACCEPTED" => 202,
        "NO_CONTENT" => 204,
        "RESET_CONTENT" => 205,
        "PARTIAL_CONTENT" => 206,
        "MOVED_PERMANENTLY" => 301,
        "FOUND" => 302,
        "SEE_OTHER" => 303,
        "NOT_MODIFIED" => 304,
        "TEMPORARY_REDIRECT" => 307,
        "BAD_REQUEST" => 400,
        "UNAUTHORIZED" => 401,
        "PAYMENT_REQUIRED" => 402,
        "FORBIDDEN" => 403,
        "NOT_FOUND" => 404,
        "METHOD_NOT_ALLOWED" => 405,
        "NOT_ACCEPTABLE" => 406,
        "CONFLICT" => 409,
        "GONE" => 410,
        "PRECONDITION_FAILED" => 412,
        "UNSUPPORTED_MEDIA_TYPE" => 415,
        "INTERNAL_SERVER_ERROR" => 500,
        "NOT_IMPLEMENTED" => 501,
        "SERVICE_UNAVAILABLE" => 503,
        _ => return None,
    };
    Some(code)
}

fn media_type_constant(constant: &str) -> Option<&'static str> {
    let text = match constant {
        "APPLICATION_JSON" => "application/json",
        "APPLICATION_XML" => "application/xml",
        "APPLICATION_OCTET_STREAM" => "application/octet-stream",
        "APPLICATION_FORM_URLENCODED" => "application/x-www-form-urlencoded",
        "MULTIPART_FORM_DATA" => "multipart/form-data",
        "TEXT_PLAIN" => "text/plain",
        "TEXT_HTML" => "text/html",
        "TEXT_XML" => "text/xml",
        "WILDCARD" => "*/*",
        _ => return None,
    };
    Some(text)
}

/// Array element names arrive as primitive keywords (`newarray`), internal
/// class names (`anewarray`), or full array descriptors (`multianewarray`).
fn array_type(element: Option<&str>) -> TypeRef {
    let Some(name) = element else {
        return TypeRef::object(OBJECT);
    };
    if name.starts_with('[') {
        return TypeRef::from_descriptor(name).unwrap_or_else(|_| TypeRef::object(OBJECT));
    }
    let inner = match name {
        "boolean" | "byte" | "char" | "short" | "int" | "long" | "float" | "double" => {
            TypeRef::primitive(name)
        }
        _ => TypeRef::object(name),
    };
    TypeRef::array_of(&inner)
}

fn obj_ids(element: &Element) -> Vec<u32> {
    element
        .possible_values
        .iter()
        .filter_map(|value| match value {
            Value::Obj(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn array_element(array: &Element, heap: &BTreeMap<u32, JsonValue>) -> Element {
    let mut merged = Element::indeterminate();
    for id in obj_ids(array) {
        if let Some(JsonValue::Array(inner)) = heap.get(&id) {
            merged.merge_in_place(inner);
        }
    }
    merged
}

/// Replaces allocation-site references with their resolved JSON shapes.
fn resolve_element(element: &Element, heap: &BTreeMap<u32, JsonValue>) -> Element {
    let mut seen = BTreeSet::new();
    resolve_element_inner(element, heap, &mut seen)
}

fn resolve_element_inner(
    element: &Element,
    heap: &BTreeMap<u32, JsonValue>,
    seen: &mut BTreeSet<u32>,
) -> Element {
    let mut resolved = Element {
        types: element.types.clone(),
        possible_values: BTreeSet::new(),
    };
    for value in &element.possible_values {
        match value {
            Value::Obj(id) => {
                if seen.insert(*id) {
                    if let Some(shape) = heap.get(id) {
                        resolved
                            .possible_values
                            .insert(Value::Json(resolve_json(shape, heap, seen)));
                    }
                    seen.remove(id);
                }
                // A cyclic reference is dropped; the enclosing shape keeps
                // its other fields.
            }
            other => {
                resolved.possible_values.insert(other.clone());
            }
        }
    }
    resolved
}

fn resolve_json(
    shape: &JsonValue,
    heap: &BTreeMap<u32, JsonValue>,
    seen: &mut BTreeSet<u32>,
) -> JsonValue {
    match shape {
        JsonValue::Object(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(name, element)| {
                    (name.clone(), resolve_element_inner(element, heap, seen))
                })
                .collect(),
        ),
        JsonValue::Array(inner) => {
            JsonValue::Array(resolve_element_inner(inner, heap, seen))
        }
    }
}

fn is_collection_class(name: &str) -> bool {
    matches!(
        name,
        "java/util/ArrayList"
            | "java/util/LinkedList"
            | "java/util/HashSet"
            | "java/util/LinkedHashSet"
            | "java/util/TreeSet"
            | "java/util/Vector"
            | "java/util/ArrayDeque"
            | "java/util/PriorityQueue"
            | "java/util/concurrent/CopyOnWriteArrayList"
    )
}

fn is_collection_add(name: &str) -> bool {
    matches!(name, "add" | "addAll" | "addFirst" | "addLast" | "offer" | "push")
}

fn invoke(
    ctx: &AnalysisContext,
    call: &CallSite,
    frame: &mut Frame,
    chain: &mut Vec<ProjectMethod>,
    unresolved: &mut BTreeSet<ProjectMethod>,
) {
    let arg_count = crate::descriptor::method_param_count(&call.descriptor).unwrap_or(0);
    let args = frame.pop_n(arg_count);
    let receiver = match call.kind {
        CallKind::Static | CallKind::Dynamic => None,
        _ => Some(frame.pop()),
    };

    // Response.ok()/status()/... entry points.
    if call.kind == CallKind::Static && types::RESPONSE_TYPES.contains(&call.owner.as_str()) {
        if let Some(builder) = response_entry(call, &args, frame) {
            frame.push(builder);
            return;
        }
    }

    // ResponseBuilder chain steps and build().
    if BUILDER_TYPES.contains(&call.owner.as_str()) {
        if let Some(receiver) = &receiver {
            frame.push(builder_step(call, receiver, &args, frame));
            return;
        }
    }

    // Collection mutation folds the argument into the allocation site.
    if let Some(receiver) = &receiver {
        if is_collection_add(&call.name) {
            let targets: Vec<u32> = obj_ids(receiver)
                .into_iter()
                .filter(|id| matches!(frame.heap.get(id), Some(JsonValue::Array(_))))
                .collect();
            if !targets.is_empty() {
                if let Some(value) = args.first() {
                    for id in targets {
                        if let Some(JsonValue::Array(inner)) = frame.heap.get_mut(&id) {
                            inner.merge_in_place(value);
                        }
                    }
                }
                push_default_return(&call.descriptor, frame);
                return;
            }
        }
        if call.name == "put" && args.len() == 2 {
            let targets: Vec<u32> = obj_ids(receiver)
                .into_iter()
                .filter(|id| matches!(frame.heap.get(id), Some(JsonValue::Object(_))))
                .collect();
            if !targets.is_empty() {
                for id in targets {
                    if let Some(JsonValue::Object(fields)) = frame.heap.get_mut(&id) {
                        for key in string_values(&args[0]) {
                            fields
                                .entry(key)
                                .and_modify(|existing| existing.merge_in_place(&args[1]))
                                .or_insert_with(|| args[1].clone());
                        }
                    }
                }
                push_default_return(&call.descriptor, frame);
                return;
            }
        }
    }

    // In-project target: inline its simulated result.
    if ctx.is_project_class(&call.owner) && call.name != "<init>" {
        let target = ProjectMethod::new(&call.owner, &call.name, &call.descriptor);
        let result = simulate_with_chain(ctx, &target, chain, unresolved);
        if types::return_type(&call.descriptor).ok().flatten().is_some() {
            frame.push(result);
        }
        return;
    }

    push_default_return(&call.descriptor, frame);
}

fn push_default_return(descriptor: &str, frame: &mut Frame) {
    if let Ok(Some(type_ref)) = types::return_type(descriptor) {
        frame.push(Element::of_type(type_ref));
    }
}

fn string_values(element: &Element) -> Vec<String> {
    element
        .possible_values
        .iter()
        .filter_map(|value| match value {
            Value::Str(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn int_values(element: &Element) -> Vec<i64> {
    element
        .possible_values
        .iter()
        .filter_map(|value| match value {
            Value::Int(number) => Some(*number),
            _ => None,
        })
        .collect()
}

/// Static `Response` factory methods that open a builder chain.
fn response_entry(call: &CallSite, args: &[Element], frame: &Frame) -> Option<Element> {
    let mut response = HttpResponse::default();
    match call.name.as_str() {
        "ok" => {
            response.statuses.insert(200);
            if let Some(entity) = args.first() {
                absorb_entity(&mut response, entity, frame);
            }
        }
        "created" => {
            response.statuses.insert(201);
            response
                .headers
                .entry("Location".to_string())
                .or_default();
        }
        "accepted" => {
            response.statuses.insert(202);
            if let Some(entity) = args.first() {
                absorb_entity(&mut response, entity, frame);
            }
        }
        "noContent" => {
            response.statuses.insert(204);
        }
        "notAcceptable" => {
            response.statuses.insert(406);
        }
        "serverError" => {
            response.statuses.insert(500);
        }
        "seeOther" => {
            response.statuses.insert(303);
        }
        "temporaryRedirect" => {
            response.statuses.insert(307);
        }
        "status" => {
            if let Some(status) = args.first() {
                for code in int_values(status) {
                    if let Ok(code) = u16::try_from(code) {
                        response.statuses.insert(code);
                    }
                }
            }
        }
        "fromResponse" => {
            if let Some(origin) = args.first() {
                for existing in origin.responses() {
                    response = merge_responses(&response, existing);
                }
            }
        }
        _ => return None,
    }
    Some(Element::with_value(
        builder_type_for(&call.owner),
        Value::Builder(response),
    ))
}

fn builder_type_for(response_owner: &str) -> TypeRef {
    TypeRef::object(&format!("{response_owner}$ResponseBuilder"))
}

fn merge_responses(a: &HttpResponse, b: &HttpResponse) -> HttpResponse {
    let mut merged = a.clone();
    merged.statuses.extend(b.statuses.iter().copied());
    merged.entity_types.extend(b.entity_types.iter().cloned());
    merged
        .inline_entities
        .extend(b.inline_entities.iter().cloned());
    for (name, values) in &b.headers {
        merged
            .headers
            .entry(name.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
    merged
}

fn absorb_entity(response: &mut HttpResponse, entity: &Element, frame: &Frame) {
    let resolved = resolve_element(entity, &frame.heap);
    response.entity_types.extend(
        resolved
            .types
            .iter()
            .filter(|type_ref| !type_ref.is_response())
            .cloned(),
    );
    for value in &resolved.possible_values {
        if let Value::Json(shape) = value {
            response.inline_entities.insert(shape.clone());
        }
    }
}

/// One chained `ResponseBuilder` method on the current builder states.
fn builder_step(call: &CallSite, receiver: &Element, args: &[Element], frame: &Frame) -> Element {
    let mut builders: Vec<HttpResponse> = receiver
        .possible_values
        .iter()
        .filter_map(|value| match value {
            Value::Builder(response) => Some(response.clone()),
            _ => None,
        })
        .collect();
    if builders.is_empty() {
        builders.push(HttpResponse::default());
    }

    if call.name == "build" {
        let mut element = Element::of_type(TypeRef::object(&owner_response_type(&call.owner)));
        for builder in builders {
            element.possible_values.insert(Value::Response(builder));
        }
        return element;
    }

    for builder in &mut builders {
        match call.name.as_str() {
            "entity" => {
                if let Some(entity) = args.first() {
                    absorb_entity(builder, entity, frame);
                }
            }
            "status" => {
                if let Some(status) = args.first() {
                    builder.statuses.clear();
                    for code in int_values(status) {
                        if let Ok(code) = u16::try_from(code) {
                            builder.statuses.insert(code);
                        }
                    }
                }
            }
            "header" => {
                if args.len() == 2 {
                    let values: BTreeSet<Value> = args[1]
                        .plain_values()
                        .cloned()
                        .filter(|value| !matches!(value, Value::Obj(_)))
                        .collect();
                    for name in string_values(&args[0]) {
                        builder.headers.entry(name).or_default().extend(values.clone());
                    }
                }
            }
            "type" => {
                if let Some(media) = args.first() {
                    let values: BTreeSet<Value> = media
                        .possible_values
                        .iter()
                        .filter(|value| matches!(value, Value::Str(_)))
                        .cloned()
                        .collect();
                    builder
                        .headers
                        .entry("Content-Type".to_string())
                        .or_default()
                        .extend(values);
                }
            }
            "location" | "contentLocation" => {
                builder
                    .headers
                    .entry("Location".to_string())
                    .or_default();
            }
            // Remaining chain steps keep the builder state unchanged.
            _ => {}
        }
    }

    let mut element = Element::of_type(TypeRef::object(&call.owner));
    for builder in builders {
        element.possible_values.insert(Value::Builder(builder));
    }
    element
}

fn owner_response_type(builder_owner: &str) -> String {
    builder_owner
        .strip_suffix("$ResponseBuilder")
        .unwrap_or(builder_owner)
        .to_string()
}
