use std::collections::BTreeMap;

use anyhow::{Context, Result};

/// Decoded class file surface needed by the analysis.
#[derive(Clone, Debug)]
pub(crate) struct ClassFile {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) methods: Vec<RawMethod>,
    pub(crate) pool: ConstantPool,
}

/// Method entry with its undecoded bytecode.
#[derive(Clone, Debug)]
pub(crate) struct RawMethod {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) parameter_annotations: Vec<Vec<AnnotationInfo>>,
    pub(crate) code: Option<Code>,
}

/// Code attribute payload.
#[derive(Clone, Debug)]
pub(crate) struct Code {
    pub(crate) max_locals: u16,
    pub(crate) bytes: Vec<u8>,
}

/// Runtime-visible annotation with its element values.
#[derive(Clone, Debug)]
pub(crate) struct AnnotationInfo {
    pub(crate) type_name: String,
    pub(crate) values: BTreeMap<String, AnnotationValue>,
}

impl AnnotationInfo {
    /// The `value` element as a string, if present.
    pub(crate) fn string_value(&self) -> Option<&str> {
        match self.values.get("value") {
            Some(AnnotationValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    /// The `value` element flattened to a list of strings.
    pub(crate) fn string_values(&self) -> Vec<String> {
        match self.values.get("value") {
            Some(AnnotationValue::Str(value)) => vec![value.clone()],
            Some(AnnotationValue::List(values)) => values
                .iter()
                .filter_map(|value| match value {
                    AnnotationValue::Str(value) => Some(value.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Annotation element value.
#[derive(Clone, Debug)]
pub(crate) enum AnnotationValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Class(String),
    EnumConst { type_name: String, value: String },
    List(Vec<AnnotationValue>),
    Nested(AnnotationInfo),
    Other,
}

/// Constant pool entry subset relevant for analysis.
#[derive(Clone, Debug)]
pub(crate) enum CpEntry {
    Utf8(String),
    Integer(i32),
    Long(i64),
    Class(u16),
    Str(u16),
    FieldRef { class_index: u16, name_and_type: u16 },
    MethodRef { class_index: u16, name_and_type: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    InvokeDynamic { name_and_type: u16 },
    Unusable,
}

/// Symbolic member reference resolved from the constant pool.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Loadable constant referenced by `ldc`-family instructions.
#[derive(Clone, Debug)]
pub(crate) enum Loadable {
    Str(String),
    Int(i64),
    Class(String),
    Other,
}

/// Indexed constant pool with resolution helpers.
#[derive(Clone, Debug)]
pub(crate) struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub(crate) fn utf8(&self, index: u16) -> Result<&str> {
        match self.entries.get(index as usize) {
            Some(CpEntry::Utf8(value)) => Ok(value),
            _ => anyhow::bail!("missing utf8 entry at {index}"),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<String> {
        match self.entries.get(index as usize) {
            Some(CpEntry::Class(name_index)) => Ok(self.utf8(*name_index)?.to_string()),
            _ => anyhow::bail!("missing class entry at {index}"),
        }
    }

    pub(crate) fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type) = match self.entries.get(index as usize) {
            Some(CpEntry::MethodRef {
                class_index,
                name_and_type,
            })
            | Some(CpEntry::InterfaceMethodRef {
                class_index,
                name_and_type,
            })
            | Some(CpEntry::FieldRef {
                class_index,
                name_and_type,
            }) => (*class_index, *name_and_type),
            _ => anyhow::bail!("missing member ref entry at {index}"),
        };
        let owner = self.class_name(class_index).context("resolve owner")?;
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
        })
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.entries.get(index as usize) {
            Some(CpEntry::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((
                self.utf8(*name_index)?.to_string(),
                self.utf8(*descriptor_index)?.to_string(),
            )),
            _ => anyhow::bail!("missing name and type entry at {index}"),
        }
    }

    pub(crate) fn invoke_dynamic(&self, index: u16) -> Result<(String, String)> {
        match self.entries.get(index as usize) {
            Some(CpEntry::InvokeDynamic { name_and_type }) => self.name_and_type(*name_and_type),
            _ => anyhow::bail!("missing invokedynamic entry at {index}"),
        }
    }

    pub(crate) fn loadable(&self, index: u16) -> Result<Loadable> {
        let value = match self.entries.get(index as usize) {
            Some(CpEntry::Str(string_index)) => Loadable::Str(self.utf8(*string_index)?.to_string()),
            Some(CpEntry::Integer(value)) => Loadable::Int(*value as i64),
            Some(CpEntry::Long(value)) => Loadable::Int(*value),
            Some(CpEntry::Class(name_index)) => Loadable::Class(self.utf8(*name_index)?.to_string()),
            _ => Loadable::Other,
        };
        Ok(value)
    }
}

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_ABSTRACT: u16 = 0x0400;

/// Parses raw class file bytes into the decoded surface.
pub(crate) fn parse(data: &[u8]) -> Result<ClassFile> {
    let mut reader = Reader { data, offset: 0 };
    let magic = reader.u32()?;
    if magic != 0xCAFEBABE {
        anyhow::bail!("invalid class file magic");
    }
    let _minor = reader.u16()?;
    let _major = reader.u16()?;
    let pool = parse_constant_pool(&mut reader)?;
    let _access_flags = reader.u16()?;
    let this_class = reader.u16()?;
    let super_class = reader.u16()?;

    let name = pool.class_name(this_class).context("resolve class name")?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(
            pool.class_name(super_class)
                .context("resolve super class name")?,
        )
    };

    let interface_count = reader.u16()? as usize;
    let mut interfaces = Vec::with_capacity(interface_count);
    for _ in 0..interface_count {
        let index = reader.u16()?;
        interfaces.push(pool.class_name(index).context("resolve interface name")?);
    }

    skip_fields(&mut reader)?;

    let method_count = reader.u16()? as usize;
    let mut methods = Vec::with_capacity(method_count);
    for _ in 0..method_count {
        methods.push(parse_method(&mut reader, &pool).context("parse method")?);
    }

    let annotations = parse_member_annotations(&mut reader, &pool).context("parse class annotations")?;

    Ok(ClassFile {
        name,
        super_name,
        interfaces,
        annotations,
        methods,
        pool,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.offset)
            .context("class file out of bounds")?;
        self.offset += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.offset;
        let end = start.checked_add(len).context("class file out of bounds")?;
        let slice = self
            .data
            .get(start..end)
            .context("class file out of bounds")?;
        self.offset = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len)?;
        Ok(())
    }
}

fn parse_constant_pool(reader: &mut Reader<'_>) -> Result<ConstantPool> {
    let count = reader.u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(CpEntry::Unusable);
    let mut index = 1u16;
    while index < count {
        let tag = reader.u8()?;
        match tag {
            1 => {
                let len = reader.u16()? as usize;
                let bytes = reader.bytes(len)?;
                entries.push(CpEntry::Utf8(String::from_utf8_lossy(bytes).to_string()));
            }
            3 => {
                let bytes = reader.bytes(4)?;
                entries.push(CpEntry::Integer(i32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])));
            }
            4 => {
                reader.skip(4)?;
                entries.push(CpEntry::Unusable);
            }
            5 => {
                let bytes = reader.bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                entries.push(CpEntry::Long(i64::from_be_bytes(raw)));
                entries.push(CpEntry::Unusable);
                index += 1;
            }
            6 => {
                reader.skip(8)?;
                entries.push(CpEntry::Unusable);
                entries.push(CpEntry::Unusable);
                index += 1;
            }
            7 => {
                let name_index = reader.u16()?;
                entries.push(CpEntry::Class(name_index));
            }
            8 => {
                let string_index = reader.u16()?;
                entries.push(CpEntry::Str(string_index));
            }
            9 => {
                let class_index = reader.u16()?;
                let name_and_type = reader.u16()?;
                entries.push(CpEntry::FieldRef {
                    class_index,
                    name_and_type,
                });
            }
            10 => {
                let class_index = reader.u16()?;
                let name_and_type = reader.u16()?;
                entries.push(CpEntry::MethodRef {
                    class_index,
                    name_and_type,
                });
            }
            11 => {
                let class_index = reader.u16()?;
                let name_and_type = reader.u16()?;
                entries.push(CpEntry::InterfaceMethodRef {
                    class_index,
                    name_and_type,
                });
            }
            12 => {
                let name_index = reader.u16()?;
                let descriptor_index = reader.u16()?;
                entries.push(CpEntry::NameAndType {
                    name_index,
                    descriptor_index,
                });
            }
            15 => {
                reader.skip(3)?;
                entries.push(CpEntry::Unusable);
            }
            16 | 19 | 20 => {
                reader.skip(2)?;
                entries.push(CpEntry::Unusable);
            }
            17 => {
                reader.skip(4)?;
                entries.push(CpEntry::Unusable);
            }
            18 => {
                let _bootstrap = reader.u16()?;
                let name_and_type = reader.u16()?;
                entries.push(CpEntry::InvokeDynamic { name_and_type });
            }
            _ => anyhow::bail!("unsupported constant pool tag: {tag}"),
        }
        index += 1;
    }
    Ok(ConstantPool { entries })
}

fn skip_fields(reader: &mut Reader<'_>) -> Result<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(6)?;
        skip_attributes(reader)?;
    }
    Ok(())
}

fn skip_attributes(reader: &mut Reader<'_>) -> Result<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(2)?;
        let length = reader.u32()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

fn parse_method(reader: &mut Reader<'_>, pool: &ConstantPool) -> Result<RawMethod> {
    let access_flags = reader.u16()?;
    let name_index = reader.u16()?;
    let descriptor_index = reader.u16()?;
    let name = pool.utf8(name_index)?.to_string();
    let descriptor = pool.utf8(descriptor_index)?.to_string();

    let mut annotations = Vec::new();
    let mut parameter_annotations = Vec::new();
    let mut code = None;

    let attribute_count = reader.u16()?;
    for _ in 0..attribute_count {
        let attribute_name_index = reader.u16()?;
        let length = reader.u32()? as usize;
        let attribute_name = pool.utf8(attribute_name_index)?.to_string();
        match attribute_name.as_str() {
            "Code" => {
                let _max_stack = reader.u16()?;
                let max_locals = reader.u16()?;
                let code_length = reader.u32()? as usize;
                let bytes = reader.bytes(code_length)?.to_vec();
                let exception_count = reader.u16()? as usize;
                reader.skip(exception_count * 8)?;
                skip_attributes(reader)?;
                code = Some(Code { max_locals, bytes });
            }
            "RuntimeVisibleAnnotations" => {
                annotations = parse_annotations(reader, pool)?;
            }
            "RuntimeVisibleParameterAnnotations" => {
                let parameter_count = reader.u8()? as usize;
                for _ in 0..parameter_count {
                    parameter_annotations.push(parse_annotations(reader, pool)?);
                }
            }
            _ => reader.skip(length)?,
        }
    }

    Ok(RawMethod {
        name,
        descriptor,
        is_public: access_flags & ACC_PUBLIC != 0,
        is_static: access_flags & ACC_STATIC != 0,
        is_abstract: access_flags & ACC_ABSTRACT != 0,
        annotations,
        parameter_annotations,
        code,
    })
}

fn parse_member_annotations(
    reader: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<AnnotationInfo>> {
    let mut annotations = Vec::new();
    let count = reader.u16()?;
    for _ in 0..count {
        let attribute_name_index = reader.u16()?;
        let length = reader.u32()? as usize;
        let attribute_name = pool.utf8(attribute_name_index)?.to_string();
        if attribute_name == "RuntimeVisibleAnnotations" {
            annotations = parse_annotations(reader, pool)?;
        } else {
            reader.skip(length)?;
        }
    }
    Ok(annotations)
}

fn parse_annotations(reader: &mut Reader<'_>, pool: &ConstantPool) -> Result<Vec<AnnotationInfo>> {
    let count = reader.u16()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(parse_annotation(reader, pool)?);
    }
    Ok(annotations)
}

fn parse_annotation(reader: &mut Reader<'_>, pool: &ConstantPool) -> Result<AnnotationInfo> {
    let type_index = reader.u16()?;
    let descriptor = pool.utf8(type_index)?.to_string();
    let type_name = descriptor
        .strip_prefix('L')
        .and_then(|value| value.strip_suffix(';'))
        .with_context(|| format!("invalid annotation descriptor: {descriptor}"))?
        .to_string();
    let pair_count = reader.u16()? as usize;
    let mut values = BTreeMap::new();
    for _ in 0..pair_count {
        let name_index = reader.u16()?;
        let name = pool.utf8(name_index)?.to_string();
        let value = parse_element_value(reader, pool)?;
        values.insert(name, value);
    }
    Ok(AnnotationInfo { type_name, values })
}

fn parse_element_value(reader: &mut Reader<'_>, pool: &ConstantPool) -> Result<AnnotationValue> {
    let tag = reader.u8()?;
    let value = match tag {
        b's' => {
            let index = reader.u16()?;
            AnnotationValue::Str(pool.utf8(index)?.to_string())
        }
        b'B' | b'C' | b'I' | b'S' => {
            let index = reader.u16()?;
            match pool.entries.get(index as usize) {
                Some(CpEntry::Integer(value)) => AnnotationValue::Int(*value as i64),
                _ => AnnotationValue::Other,
            }
        }
        b'J' => {
            let index = reader.u16()?;
            match pool.entries.get(index as usize) {
                Some(CpEntry::Long(value)) => AnnotationValue::Int(*value),
                _ => AnnotationValue::Other,
            }
        }
        b'Z' => {
            let index = reader.u16()?;
            match pool.entries.get(index as usize) {
                Some(CpEntry::Integer(value)) => AnnotationValue::Bool(*value != 0),
                _ => AnnotationValue::Other,
            }
        }
        b'D' | b'F' => {
            reader.skip(2)?;
            AnnotationValue::Other
        }
        b'e' => {
            let type_index = reader.u16()?;
            let const_index = reader.u16()?;
            AnnotationValue::EnumConst {
                type_name: pool.utf8(type_index)?.to_string(),
                value: pool.utf8(const_index)?.to_string(),
            }
        }
        b'c' => {
            let index = reader.u16()?;
            AnnotationValue::Class(pool.utf8(index)?.to_string())
        }
        b'@' => AnnotationValue::Nested(parse_annotation(reader, pool)?),
        b'[' => {
            let count = reader.u16()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(parse_element_value(reader, pool)?);
            }
            AnnotationValue::List(values)
        }
        _ => anyhow::bail!("unsupported element value tag: {}", tag as char),
    };
    Ok(value)
}
