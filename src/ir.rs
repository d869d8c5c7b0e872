use anyhow::{Context, Result};
use tracing::warn;

use crate::classfile::{ClassFile, ConstantPool, Loadable, MemberRef};
use crate::classfile::AnnotationInfo;
use crate::opcodes;

/// Class lowered to the normalized instruction IR.
#[derive(Clone, Debug)]
pub(crate) struct ClassDef {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) methods: Vec<MethodDef>,
}

/// Method with its decoded instruction sequence.
#[derive(Clone, Debug)]
pub(crate) struct MethodDef {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) parameter_annotations: Vec<Vec<AnnotationInfo>>,
    pub(crate) max_locals: u16,
    pub(crate) instructions: Vec<Instruction>,
}

/// One normalized abstract operation.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) op: Op,
}

/// Instruction families tracked by the simulator. Stack effects are
/// value-oriented: a wide value counts as one entry.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    PushConst(Const),
    LoadLocal(usize),
    StoreLocal(usize),
    ArrayLoad,
    ArrayStore,
    Pop(usize),
    Dup,
    DupX1,
    DupX2,
    Swap,
    Arith { pops: usize },
    GetStatic(MemberRef),
    GetField(MemberRef),
    PutStatic,
    PutField(MemberRef),
    Invoke(CallSite),
    New(String),
    NewArray { element: Option<String>, dims: usize },
    Branch { targets: Vec<u32>, pops: usize, fall_through: bool },
    Return { with_value: bool },
    Throw,
    CheckCast(String),
    InstanceOf,
    Monitor,
    Nop,
}

/// Constant pushed by `ldc`-family and short-form constant instructions.
#[derive(Clone, Debug)]
pub(crate) enum Const {
    Str(String),
    Int(i64),
    Class(String),
    Null,
    Unknown,
}

/// Invocation with its resolved symbolic reference.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
    Dynamic,
}

/// Lowers a decoded class file to the instruction IR. Methods whose bytecode
/// cannot be decoded keep an empty instruction list and a diagnostic is
/// emitted; the class as a whole stays analyzable.
pub(crate) fn lower_class(class: ClassFile) -> ClassDef {
    let pool = class.pool;
    let methods = class
        .methods
        .into_iter()
        .map(|method| {
            let (max_locals, instructions) = match &method.code {
                Some(code) => match decode_instructions(&code.bytes, &pool) {
                    Ok(instructions) => (code.max_locals, instructions),
                    Err(error) => {
                        warn!(
                            class = %class.name,
                            method = %method.name,
                            "failed to decode bytecode: {error:#}"
                        );
                        (code.max_locals, Vec::new())
                    }
                },
                None => (0, Vec::new()),
            };
            MethodDef {
                name: method.name,
                descriptor: method.descriptor,
                is_public: method.is_public,
                is_static: method.is_static,
                is_abstract: method.is_abstract,
                annotations: method.annotations,
                parameter_annotations: method.parameter_annotations,
                max_locals,
                instructions,
            }
        })
        .collect();

    ClassDef {
        name: class.name,
        super_name: class.super_name,
        interfaces: class.interfaces,
        annotations: class.annotations,
        methods,
    }
}

/// Decodes raw Code bytes into the normalized instruction sequence.
pub(crate) fn decode_instructions(code: &[u8], pool: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {offset}");
        }
        let op = decode_op(code, offset, opcode, pool)
            .with_context(|| format!("decode opcode 0x{opcode:02x} at offset {offset}"))?;
        instructions.push(Instruction {
            offset: offset as u32,
            op,
        });
        offset += length;
    }
    Ok(instructions)
}

fn decode_op(code: &[u8], offset: usize, opcode: u8, pool: &ConstantPool) -> Result<Op> {
    let op = match opcode {
        opcodes::NOP => Op::Nop,
        opcodes::ACONST_NULL => Op::PushConst(Const::Null),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Op::PushConst(Const::Int(opcode as i64 - opcodes::ICONST_0 as i64))
        }
        // lconst/fconst/dconst
        opcodes::LCONST_0 | 0x0a => Op::PushConst(Const::Int((opcode - opcodes::LCONST_0) as i64)),
        0x0b..=opcodes::DCONST_1 => Op::PushConst(Const::Unknown),
        opcodes::BIPUSH => Op::PushConst(Const::Int(read_i8(code, offset + 1)? as i64)),
        opcodes::SIPUSH => Op::PushConst(Const::Int(read_i16(code, offset + 1)? as i64)),
        opcodes::LDC => {
            let index = *code.get(offset + 1).context("ldc index")? as u16;
            Op::PushConst(loadable_const(pool, index)?)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            let index = read_u16(code, offset + 1)?;
            Op::PushConst(loadable_const(pool, index)?)
        }
        // iload/lload/fload/dload/aload with operand
        opcodes::ILOAD..=opcodes::ALOAD => {
            Op::LoadLocal(*code.get(offset + 1).context("load index")? as usize)
        }
        // short-form loads
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            Op::LoadLocal(((opcode - opcodes::ILOAD_0) % 4) as usize)
        }
        opcodes::IALOAD..=opcodes::SALOAD => Op::ArrayLoad,
        // istore/lstore/fstore/dstore/astore with operand
        opcodes::ISTORE..=opcodes::ASTORE => {
            Op::StoreLocal(*code.get(offset + 1).context("store index")? as usize)
        }
        // short-form stores
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            Op::StoreLocal(((opcode - opcodes::ISTORE_0) % 4) as usize)
        }
        opcodes::IASTORE..=opcodes::SASTORE => Op::ArrayStore,
        opcodes::POP | opcodes::POP2 => Op::Pop(1),
        opcodes::DUP | opcodes::DUP2 => Op::Dup,
        opcodes::DUP_X1 | 0x5d => Op::DupX1,
        opcodes::DUP_X2 | opcodes::DUP2_X2 => Op::DupX2,
        opcodes::SWAP => Op::Swap,
        // binary arithmetic, shifts, comparisons
        0x60..=0x73 | 0x78..=0x83 | 0x94..=0x98 => Op::Arith { pops: 2 },
        // negations and conversions
        0x74..=0x77 | 0x85..=0x93 => Op::Arith { pops: 1 },
        opcodes::IINC => Op::Nop,
        opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => Op::Branch {
            targets: vec![branch_target(code, offset, 1)?],
            pops: 1,
            fall_through: true,
        },
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => Op::Branch {
            targets: vec![branch_target(code, offset, 1)?],
            pops: 2,
            fall_through: true,
        },
        opcodes::GOTO => Op::Branch {
            targets: vec![branch_target(code, offset, 1)?],
            pops: 0,
            fall_through: false,
        },
        opcodes::GOTO_W => Op::Branch {
            targets: vec![branch_target_wide(code, offset)?],
            pops: 0,
            fall_through: false,
        },
        opcodes::JSR => Op::Branch {
            targets: vec![branch_target(code, offset, 1)?],
            pops: 0,
            fall_through: true,
        },
        opcodes::JSR_W => Op::Branch {
            targets: vec![branch_target_wide(code, offset)?],
            pops: 0,
            fall_through: true,
        },
        opcodes::RET => Op::Return { with_value: false },
        opcodes::TABLESWITCH => decode_tableswitch(code, offset)?,
        opcodes::LOOKUPSWITCH => decode_lookupswitch(code, offset)?,
        // ireturn/lreturn/freturn/dreturn/areturn
        opcodes::IRETURN..=opcodes::ARETURN => Op::Return { with_value: true },
        opcodes::RETURN => Op::Return { with_value: false },
        opcodes::GETSTATIC => Op::GetStatic(pool.member_ref(read_u16(code, offset + 1)?)?),
        opcodes::PUTSTATIC => Op::PutStatic,
        opcodes::GETFIELD => Op::GetField(pool.member_ref(read_u16(code, offset + 1)?)?),
        opcodes::PUTFIELD => Op::PutField(pool.member_ref(read_u16(code, offset + 1)?)?),
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let member = pool.member_ref(read_u16(code, offset + 1)?)?;
            let kind = match opcode {
                opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                opcodes::INVOKESPECIAL => CallKind::Special,
                opcodes::INVOKESTATIC => CallKind::Static,
                _ => CallKind::Interface,
            };
            Op::Invoke(CallSite {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                kind,
            })
        }
        opcodes::INVOKEDYNAMIC => {
            let (name, descriptor) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
            Op::Invoke(CallSite {
                owner: String::new(),
                name,
                descriptor,
                kind: CallKind::Dynamic,
            })
        }
        opcodes::NEW => Op::New(pool.class_name(read_u16(code, offset + 1)?)?),
        opcodes::NEWARRAY => {
            let atype = *code.get(offset + 1).context("newarray type")?;
            Op::NewArray {
                element: primitive_array_element(atype),
                dims: 1,
            }
        }
        opcodes::ANEWARRAY => {
            let element = pool.class_name(read_u16(code, offset + 1)?)?;
            Op::NewArray {
                element: Some(element),
                dims: 1,
            }
        }
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => Op::InstanceOf,
        opcodes::ATHROW => Op::Throw,
        opcodes::CHECKCAST => Op::CheckCast(pool.class_name(read_u16(code, offset + 1)?)?),
        opcodes::MONITORENTER | opcodes::MONITOREXIT => Op::Monitor,
        opcodes::WIDE => decode_wide(code, offset)?,
        opcodes::MULTIANEWARRAY => {
            let element = pool.class_name(read_u16(code, offset + 1)?)?;
            let dims = *code.get(offset + 3).context("multianewarray dims")? as usize;
            Op::NewArray {
                element: Some(element),
                dims,
            }
        }
        0xca | 0xfe | 0xff => Op::Nop,
        _ => anyhow::bail!("unsupported opcode 0x{opcode:02x}"),
    };
    Ok(op)
}

fn decode_wide(code: &[u8], offset: usize) -> Result<Op> {
    let inner = *code.get(offset + 1).context("missing wide opcode")?;
    let index = read_u16(code, offset + 2)? as usize;
    let op = match inner {
        opcodes::ILOAD..=opcodes::ALOAD => Op::LoadLocal(index),
        opcodes::ISTORE..=opcodes::ASTORE => Op::StoreLocal(index),
        opcodes::IINC => Op::Nop,
        opcodes::RET => Op::Return { with_value: false },
        _ => anyhow::bail!("unsupported wide opcode 0x{inner:02x}"),
    };
    Ok(op)
}

fn decode_tableswitch(code: &[u8], offset: usize) -> Result<Op> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    let mut targets = vec![switch_target(offset, default)?];
    for entry in 0..count as usize {
        let jump = read_i32(code, base + 12 + entry * 4)?;
        targets.push(switch_target(offset, jump)?);
    }
    targets.sort_unstable();
    targets.dedup();
    Ok(Op::Branch {
        targets,
        pops: 1,
        fall_through: false,
    })
}

fn decode_lookupswitch(code: &[u8], offset: usize) -> Result<Op> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    let mut targets = vec![switch_target(offset, default)?];
    for pair in 0..npairs as usize {
        let jump = read_i32(code, base + 8 + pair * 8 + 4)?;
        targets.push(switch_target(offset, jump)?);
    }
    targets.sort_unstable();
    targets.dedup();
    Ok(Op::Branch {
        targets,
        pops: 1,
        fall_through: false,
    })
}

fn loadable_const(pool: &ConstantPool, index: u16) -> Result<Const> {
    let value = match pool.loadable(index)? {
        Loadable::Str(value) => Const::Str(value),
        Loadable::Int(value) => Const::Int(value),
        Loadable::Class(name) => Const::Class(name),
        Loadable::Other => Const::Unknown,
    };
    Ok(value)
}

fn primitive_array_element(atype: u8) -> Option<String> {
    // newarray atype codes carry no class; keep the primitive keyword.
    let keyword = match atype {
        4 => "boolean",
        5 => "char",
        6 => "float",
        7 => "double",
        8 => "byte",
        9 => "short",
        10 => "int",
        11 => "long",
        _ => return None,
    };
    Some(keyword.to_string())
}

fn branch_target(code: &[u8], offset: usize, operand_at: usize) -> Result<u32> {
    let delta = read_i16(code, offset + operand_at)? as i64;
    let target = offset as i64 + delta;
    if target < 0 {
        anyhow::bail!("branch target before method start");
    }
    Ok(target as u32)
}

fn branch_target_wide(code: &[u8], offset: usize) -> Result<u32> {
    let delta = read_i32(code, offset + 1)? as i64;
    let target = offset as i64 + delta;
    if target < 0 {
        anyhow::bail!("branch target before method start");
    }
    Ok(target as u32)
}

fn switch_target(offset: usize, delta: i32) -> Result<u32> {
    let target = offset as i64 + delta as i64;
    if target < 0 {
        anyhow::bail!("switch target before method start");
    }
    Ok(target as u32)
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x4e => 1,
        0x4f..=0x56 => 1,
        0x57..=0x5f => 1,
        0x60..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{opcode:02x}"),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let inner = *code.get(offset + 1).context("missing wide opcode")?;
    if inner == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i8(code: &[u8], offset: usize) -> Result<i8> {
    let byte = *code.get(offset).context("bytecode i8 out of bounds")?;
    Ok(byte as i8)
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::ClassFileBuilder;

    fn decode(builder: ClassFileBuilder) -> Vec<Instruction> {
        let bytes = builder.finish();
        let class = crate::classfile::parse(&bytes).expect("parse class");
        let def = lower_class(class);
        def.methods
            .into_iter()
            .find(|method| method.name == "method")
            .expect("method")
            .instructions
    }

    #[test]
    fn decodes_constants_and_returns() {
        let mut builder = ClassFileBuilder::new("A", "java/lang/Object");
        let hello = builder.add_string("Hello World!");
        builder
            .method("method", "()Ljava/lang/String;")
            .code(vec![opcodes::LDC, hello as u8, opcodes::ARETURN], 1)
            .add();

        let instructions = decode(builder);

        assert_eq!(instructions.len(), 2);
        assert!(matches!(
            &instructions[0].op,
            Op::PushConst(Const::Str(value)) if value == "Hello World!"
        ));
        assert!(matches!(instructions[1].op, Op::Return { with_value: true }));
    }

    #[test]
    fn decodes_branch_targets_relative_to_instruction() {
        let mut builder = ClassFileBuilder::new("A", "java/lang/Object");
        // iconst_0; ifeq +5 (-> offset 6); iconst_1; istore_1; return
        builder
            .method("method", "()V")
            .code(
                vec![
                    0x03,
                    opcodes::IFEQ,
                    0x00,
                    0x05,
                    0x04,
                    0x3c,
                    opcodes::RETURN,
                ],
                2,
            )
            .add();

        let instructions = decode(builder);

        let Op::Branch {
            targets,
            pops,
            fall_through,
        } = &instructions[1].op
        else {
            panic!("expected branch");
        };
        assert_eq!(targets, &vec![6]);
        assert_eq!(*pops, 1);
        assert!(fall_through);
    }

    #[test]
    fn decodes_invocations_with_resolved_refs() {
        let mut builder = ClassFileBuilder::new("A", "java/lang/Object");
        let target = builder.add_method_ref("B", "bar", "()Ljava/lang/String;");
        builder
            .method("method", "()V")
            .code(
                vec![
                    opcodes::INVOKESTATIC,
                    (target >> 8) as u8,
                    (target & 0xff) as u8,
                    opcodes::POP,
                    opcodes::RETURN,
                ],
                1,
            )
            .add();

        let instructions = decode(builder);

        let Op::Invoke(call) = &instructions[0].op else {
            panic!("expected invoke");
        };
        assert_eq!(call.owner, "B");
        assert_eq!(call.name, "bar");
        assert_eq!(call.descriptor, "()Ljava/lang/String;");
        assert_eq!(call.kind, CallKind::Static);
    }

    #[test]
    fn undecodable_method_degrades_to_empty_sequence() {
        let mut builder = ClassFileBuilder::new("A", "java/lang/Object");
        builder
            .method("method", "()V")
            .code(vec![0xcb], 1)
            .add();
        let bytes = builder.finish();

        let class = crate::classfile::parse(&bytes).expect("parse class");
        let def = lower_class(class);

        assert!(def.methods[0].instructions.is_empty());
    }
}
