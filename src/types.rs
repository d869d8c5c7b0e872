use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};
use serde::Serialize;

/// Nominal JVM type reference.
///
/// Classes are stored as internal names (`java/lang/String`), arrays as field
/// descriptors (`[Ljava/lang/String;`), primitives as their keyword. Equality
/// is structural on the stored name.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub(crate) struct TypeRef(String);

pub(crate) const OBJECT: &str = "java/lang/Object";
pub(crate) const STRING: &str = "java/lang/String";
pub(crate) const CLASS: &str = "java/lang/Class";

/// Internal names of the JAX-RS response type, old and new namespace.
pub(crate) const RESPONSE_TYPES: [&str; 2] =
    ["javax/ws/rs/core/Response", "jakarta/ws/rs/core/Response"];

impl TypeRef {
    pub(crate) fn object(internal_name: &str) -> Self {
        Self(internal_name.to_string())
    }

    pub(crate) fn primitive(keyword: &str) -> Self {
        Self(keyword.to_string())
    }

    /// Builds a type from a field descriptor (`Ljava/lang/String;`, `[I`, `I`).
    pub(crate) fn from_descriptor(descriptor: &str) -> Result<Self> {
        let parsed = TypeDescriptor::from_str(descriptor)
            .with_context(|| format!("invalid field descriptor: {descriptor}"))?;
        Ok(Self::from_jvm(&parsed))
    }

    fn from_jvm(descriptor: &TypeDescriptor) -> Self {
        let name = match descriptor {
            TypeDescriptor::Object(class_name) => class_name.clone(),
            TypeDescriptor::Array(_, _) => descriptor.to_string(),
            TypeDescriptor::Byte => "byte".to_string(),
            TypeDescriptor::Char => "char".to_string(),
            TypeDescriptor::Double => "double".to_string(),
            TypeDescriptor::Float => "float".to_string(),
            TypeDescriptor::Integer => "int".to_string(),
            TypeDescriptor::Long => "long".to_string(),
            TypeDescriptor::Short => "short".to_string(),
            TypeDescriptor::Boolean => "boolean".to_string(),
            TypeDescriptor::Void => "void".to_string(),
        };
        Self(name)
    }

    pub(crate) fn array_of(element: &TypeRef) -> Self {
        if element.0.starts_with('[') || primitive_descriptor(&element.0).is_none() {
            if element.0.starts_with('[') {
                Self(format!("[{}", element.0))
            } else {
                Self(format!("[L{};", element.0))
            }
        } else {
            Self(format!("[{}", primitive_descriptor(&element.0).unwrap_or('V')))
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    pub(crate) fn is(&self, internal_name: &str) -> bool {
        self.0 == internal_name
    }

    pub(crate) fn is_response(&self) -> bool {
        RESPONSE_TYPES.contains(&self.0.as_str())
    }

    pub(crate) fn is_object(&self) -> bool {
        self.0 == OBJECT
    }

    /// Dotted source-form name used in rendered output.
    pub(crate) fn display_name(&self) -> String {
        let mut depth = 0usize;
        let mut rest = self.0.as_str();
        while let Some(stripped) = rest.strip_prefix('[') {
            depth += 1;
            rest = stripped;
        }
        let base = if depth == 0 {
            rest.replace('/', ".")
        } else if let Some(name) = rest.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            name.replace('/', ".")
        } else {
            primitive_keyword(rest.as_bytes().first().copied())
                .unwrap_or("?")
                .to_string()
        };
        format!("{}{}", base, "[]".repeat(depth))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn primitive_keyword(tag: Option<u8>) -> Option<&'static str> {
    match tag? {
        b'B' => Some("byte"),
        b'C' => Some("char"),
        b'D' => Some("double"),
        b'F' => Some("float"),
        b'I' => Some("int"),
        b'J' => Some("long"),
        b'S' => Some("short"),
        b'Z' => Some("boolean"),
        b'V' => Some("void"),
        _ => None,
    }
}

fn primitive_descriptor(keyword: &str) -> Option<char> {
    match keyword {
        "byte" => Some('B'),
        "char" => Some('C'),
        "double" => Some('D'),
        "float" => Some('F'),
        "int" => Some('I'),
        "long" => Some('J'),
        "short" => Some('S'),
        "boolean" => Some('Z'),
        "void" => Some('V'),
        _ => None,
    }
}

/// Parameter types of a method descriptor as type references.
pub(crate) fn parameter_types(descriptor: &str) -> Result<Vec<TypeRef>> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("invalid method descriptor: {descriptor}"))?;
    Ok(parsed.parameter_types().iter().map(TypeRef::from_jvm).collect())
}

/// Return type of a method descriptor, or `None` for void.
pub(crate) fn return_type(descriptor: &str) -> Result<Option<TypeRef>> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("invalid method descriptor: {descriptor}"))?;
    Ok(match parsed.return_type() {
        TypeDescriptor::Void => None,
        other => Some(TypeRef::from_jvm(other)),
    })
}
