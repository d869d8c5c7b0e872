//! Minimal classfile emitter for tests. Builds just enough of the format to
//! exercise the parser and the bytecode pipeline without shipping fixture
//! binaries in the repository.

use std::collections::BTreeMap;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_SUPER: u16 = 0x0020;

/// Annotation element value, mirroring the JVMS `element_value` encoding.
#[derive(Clone)]
pub(crate) enum ElementValue {
    Str(&'static str),
    Int(i32),
    Bool(bool),
    List(Vec<ElementValue>),
}

/// Opaque reference to an annotation registered on the builder.
#[derive(Clone, Copy)]
pub(crate) struct AnnotationHandle(usize);

enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    Str(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
    FieldRef(u16, u16),
}

struct MethodSpec {
    name: u16,
    descriptor: u16,
    annotations: Vec<usize>,
    parameter_annotations: Option<Vec<Vec<usize>>>,
    code: Option<(Vec<u8>, u16)>,
}

pub(crate) struct ClassFileBuilder {
    pool: Vec<PoolEntry>,
    utf8_cache: BTreeMap<String, u16>,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    annotations: Vec<Vec<u8>>,
    class_annotations: Vec<usize>,
    methods: Vec<MethodSpec>,
}

impl ClassFileBuilder {
    pub(crate) fn new(name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            pool: Vec::new(),
            utf8_cache: BTreeMap::new(),
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            class_annotations: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.add_class(name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn interface(mut self, name: &str) -> Self {
        let index = self.add_class(name);
        self.interfaces.push(index);
        self
    }

    fn add_utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(value) {
            return index;
        }
        self.pool.push(PoolEntry::Utf8(value.to_string()));
        let index = self.pool.len() as u16;
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.pool.push(PoolEntry::Class(name_index));
        self.pool.len() as u16
    }

    /// Adds a `CONSTANT_String` entry and returns its one-based pool index.
    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let utf8 = self.add_utf8(value);
        self.pool.push(PoolEntry::Str(utf8));
        self.pool.len() as u16
    }

    pub(crate) fn add_integer(&mut self, value: i32) -> u16 {
        self.pool.push(PoolEntry::Integer(value));
        self.pool.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.add_class(owner);
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.pool
            .push(PoolEntry::NameAndType(name_index, descriptor_index));
        let name_and_type = self.pool.len() as u16;
        self.pool.push(PoolEntry::MethodRef(class, name_and_type));
        self.pool.len() as u16
    }

    pub(crate) fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.add_class(owner);
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.pool
            .push(PoolEntry::NameAndType(name_index, descriptor_index));
        let name_and_type = self.pool.len() as u16;
        self.pool.push(PoolEntry::FieldRef(class, name_and_type));
        self.pool.len() as u16
    }

    /// Registers an annotation and returns a handle that can be attached to
    /// the class, a method, or a parameter slot.
    pub(crate) fn annotation(
        &mut self,
        type_descriptor: &str,
        values: &[(&str, ElementValue)],
    ) -> AnnotationHandle {
        let type_index = self.add_utf8(type_descriptor);
        let mut bytes = Vec::new();
        push_u16(&mut bytes, type_index);
        push_u16(&mut bytes, values.len() as u16);
        for (name, value) in values {
            let name_index = self.add_utf8(name);
            push_u16(&mut bytes, name_index);
            self.encode_element_value(&mut bytes, value);
        }
        self.annotations.push(bytes);
        AnnotationHandle(self.annotations.len() - 1)
    }

    pub(crate) fn class_annotation(&mut self, handle: AnnotationHandle) {
        self.class_annotations.push(handle.0);
    }

    pub(crate) fn method(&mut self, name: &str, descriptor: &str) -> MethodBuilder<'_> {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        MethodBuilder {
            class: self,
            spec: MethodSpec {
                name: name_index,
                descriptor: descriptor_index,
                annotations: Vec::new(),
                parameter_annotations: None,
                code: None,
            },
        }
    }

    fn encode_element_value(&mut self, out: &mut Vec<u8>, value: &ElementValue) {
        match value {
            ElementValue::Str(text) => {
                out.push(b's');
                let index = self.add_utf8(text);
                push_u16(out, index);
            }
            ElementValue::Int(number) => {
                out.push(b'I');
                let index = self.add_integer(*number);
                push_u16(out, index);
            }
            ElementValue::Bool(flag) => {
                out.push(b'Z');
                let index = self.add_integer(i32::from(*flag));
                push_u16(out, index);
            }
            ElementValue::List(values) => {
                out.push(b'[');
                push_u16(out, values.len() as u16);
                for value in values {
                    self.encode_element_value(out, value);
                }
            }
        }
    }

    fn annotations_attribute(&mut self, name: &str, handles: &[usize]) -> Vec<u8> {
        let name_index = self.add_utf8(name);
        let mut body = Vec::new();
        push_u16(&mut body, handles.len() as u16);
        for &handle in handles {
            body.extend_from_slice(&self.annotations[handle]);
        }
        attribute(name_index, body)
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        // Serialize the methods first so every pool entry they need exists
        // before the pool itself is written out.
        let specs = std::mem::take(&mut self.methods);
        let mut method_bytes = Vec::new();
        for spec in &specs {
            method_bytes.extend_from_slice(&self.serialize_method(spec));
        }

        let mut class_attrs = Vec::new();
        if !self.class_annotations.is_empty() {
            let handles = self.class_annotations.clone();
            class_attrs.push(self.annotations_attribute("RuntimeVisibleAnnotations", &handles));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        push_u16(&mut out, 0); // minor
        push_u16(&mut out, 52); // major, Java 8
        push_u16(&mut out, self.pool.len() as u16 + 1);
        for entry in &self.pool {
            match entry {
                PoolEntry::Utf8(text) => {
                    out.push(1);
                    push_u16(&mut out, text.len() as u16);
                    out.extend_from_slice(text.as_bytes());
                }
                PoolEntry::Integer(value) => {
                    out.push(3);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                PoolEntry::Class(name) => {
                    out.push(7);
                    push_u16(&mut out, *name);
                }
                PoolEntry::Str(utf8) => {
                    out.push(8);
                    push_u16(&mut out, *utf8);
                }
                PoolEntry::MethodRef(class, name_and_type) => {
                    out.push(10);
                    push_u16(&mut out, *class);
                    push_u16(&mut out, *name_and_type);
                }
                PoolEntry::FieldRef(class, name_and_type) => {
                    out.push(9);
                    push_u16(&mut out, *class);
                    push_u16(&mut out, *name_and_type);
                }
                PoolEntry::NameAndType(name, descriptor) => {
                    out.push(12);
                    push_u16(&mut out, *name);
                    push_u16(&mut out, *descriptor);
                }
            }
        }
        push_u16(&mut out, ACC_PUBLIC | ACC_SUPER);
        push_u16(&mut out, self.this_class);
        push_u16(&mut out, self.super_class);
        push_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            push_u16(&mut out, *interface);
        }
        push_u16(&mut out, 0); // fields
        push_u16(&mut out, specs.len() as u16);
        out.extend_from_slice(&method_bytes);
        push_u16(&mut out, class_attrs.len() as u16);
        for attr in &class_attrs {
            out.extend_from_slice(attr);
        }
        out
    }

    fn serialize_method(&mut self, spec: &MethodSpec) -> Vec<u8> {
        let mut attrs: Vec<Vec<u8>> = Vec::new();
        if let Some((code, max_locals)) = &spec.code {
            let name_index = self.add_utf8("Code");
            let mut body = Vec::new();
            push_u16(&mut body, 8); // max_stack, generous fixed bound
            push_u16(&mut body, *max_locals);
            body.extend_from_slice(&(code.len() as u32).to_be_bytes());
            body.extend_from_slice(code);
            push_u16(&mut body, 0); // exception table
            push_u16(&mut body, 0); // code attributes
            attrs.push(attribute(name_index, body));
        }
        if !spec.annotations.is_empty() {
            attrs.push(
                self.annotations_attribute("RuntimeVisibleAnnotations", &spec.annotations),
            );
        }
        if let Some(per_param) = &spec.parameter_annotations {
            let name_index = self.add_utf8("RuntimeVisibleParameterAnnotations");
            let mut body = Vec::new();
            body.push(per_param.len() as u8);
            for handles in per_param {
                push_u16(&mut body, handles.len() as u16);
                for &handle in handles {
                    body.extend_from_slice(&self.annotations[handle]);
                }
            }
            attrs.push(attribute(name_index, body));
        }

        let mut out = Vec::new();
        push_u16(&mut out, ACC_PUBLIC);
        push_u16(&mut out, spec.name);
        push_u16(&mut out, spec.descriptor);
        push_u16(&mut out, attrs.len() as u16);
        for attr in &attrs {
            out.extend_from_slice(attr);
        }
        out
    }
}

pub(crate) struct MethodBuilder<'a> {
    class: &'a mut ClassFileBuilder,
    spec: MethodSpec,
}

impl MethodBuilder<'_> {
    pub(crate) fn annotation(mut self, handle: AnnotationHandle) -> Self {
        self.spec.annotations.push(handle.0);
        self
    }

    pub(crate) fn parameter_annotations(mut self, per_param: Vec<Vec<AnnotationHandle>>) -> Self {
        self.spec.parameter_annotations = Some(
            per_param
                .into_iter()
                .map(|handles| handles.into_iter().map(|handle| handle.0).collect())
                .collect(),
        );
        self
    }

    pub(crate) fn code(mut self, bytes: Vec<u8>, max_locals: u16) -> Self {
        self.spec.code = Some((bytes, max_locals));
        self
    }

    pub(crate) fn add(self) {
        self.class.methods.push(self.spec);
    }
}

fn attribute(name_index: u16, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    push_u16(&mut out, name_index);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}
