use classfile_codec::jvm::class_file::{
    ClassFile, ConstantIndex, ConstantPool, Method, StackMapFrame, Version,
};
use classfile_codec::jvm::code::{opcodes, CodeBuilder, CodeReader, Instruction, TypeKind};
use classfile_codec::jvm::verifier::{ClassHierarchy, MethodContext};
use classfile_codec::jvm::{ClassAccessFlags, Error, MethodAccessFlags, Settings};
use std::sync::Arc;

const CLASS: &str = "demo/Point";

fn build_method(
    pool: &mut ConstantPool,
    access_flags: MethodAccessFlags,
    name: &str,
    descriptor: &str,
    body: impl FnOnce(&mut CodeBuilder<'_>) -> Result<(), Error>,
) -> Result<Method, Error> {
    let is_static = access_flags.contains(MethodAccessFlags::STATIC);
    let context = MethodContext::new(CLASS, name, descriptor, is_static);
    let mut builder = CodeBuilder::new(pool, context, Settings::new());
    body(&mut builder)?;
    let code = builder.build(&ClassHierarchy::with_java_lang())?;

    let mut method = Method {
        access_flags,
        name_index: pool.utf8_entry(name)?,
        descriptor_index: pool.utf8_entry(descriptor)?,
        attributes: vec![],
    };
    method.set_code(pool, &code)?;
    Ok(method)
}

fn constructor(code: &mut CodeBuilder<'_>) -> Result<(), Error> {
    code.load(TypeKind::Reference, 0)?;
    code.invoke(
        opcodes::INVOKESPECIAL,
        "java/lang/Object",
        "<init>",
        "()V",
        false,
    )?;
    code.return_value(TypeKind::Void)
}

fn max(code: &mut CodeBuilder<'_>) -> Result<(), Error> {
    let second = code.new_label();
    code.load(TypeKind::Int, 0)?;
    code.load(TypeKind::Int, 1)?;
    code.branch(opcodes::IF_ICMPLT, second)?;
    code.load(TypeKind::Int, 0)?;
    code.return_value(TypeKind::Int)?;
    code.bind(second)?;
    code.load(TypeKind::Int, 1)?;
    code.return_value(TypeKind::Int)
}

fn point_class() -> Result<ClassFile, Error> {
    let mut pool = ConstantPool::new();
    let this_class = pool.class_entry_by_name(CLASS)?;
    let super_class = pool.class_entry_by_name("java/lang/Object")?;
    let methods = vec![
        build_method(
            &mut pool,
            MethodAccessFlags::PUBLIC,
            "<init>",
            "()V",
            constructor,
        )?,
        build_method(
            &mut pool,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "max",
            "(II)I",
            max,
        )?,
    ];
    Ok(ClassFile {
        version: Version::JAVA11,
        constants: Arc::new(pool),
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class: Some(super_class),
        interfaces: vec![],
        fields: vec![],
        methods,
        attributes: vec![],
    })
}

#[test]
fn built_class_reparses_identically() -> Result<(), Error> {
    let bytes = point_class()?.to_bytes()?;
    assert_eq!(bytes[..4], ClassFile::MAGIC);

    let parsed = ClassFile::parse(&bytes)?;
    assert_eq!(parsed.name()?, CLASS);
    assert_eq!(parsed.super_name()?, Some("java/lang/Object"));
    assert_eq!(parsed.version, Version::JAVA11);
    assert_eq!(parsed.methods.len(), 2);
    assert_eq!(parsed.to_bytes()?, bytes);

    let max = &parsed.methods[1];
    assert_eq!(max.name(&parsed.constants)?, "max");
    let code = max.code(&parsed.constants)?.expect("max has code");
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);
    let table = code
        .stack_map_table(&parsed.constants)?
        .expect("max has a branch");
    assert_eq!(
        table.0,
        vec![StackMapFrame::SameLocalsNoStack { offset_delta: 7 }]
    );
    Ok(())
}

#[test]
fn unchanged_child_pool_writes_the_same_bytes() -> Result<(), Error> {
    let bytes = point_class()?.to_bytes()?;
    let mut parsed = ClassFile::parse(&bytes)?;
    let child = parsed.edit_constants();
    assert_eq!(child.size(), parsed.constants.size());
    parsed.set_constants(child)?;
    assert_eq!(parsed.to_bytes()?, bytes);
    Ok(())
}

#[test]
fn child_pool_reuses_parent_entries() -> Result<(), Error> {
    let parsed = ClassFile::parse(&point_class()?.to_bytes()?)?;
    let mut child = parsed.edit_constants();
    let size = child.size();

    // Lookups of parsed entries resolve to the parsed indices
    assert_eq!(child.class_entry_by_name(CLASS)?, parsed.this_class);
    assert_eq!(child.utf8_entry("max")?, parsed.methods[1].name_index);
    assert_eq!(child.size(), size);

    // New entries go after the parent's
    let fresh = child.utf8_entry("fresh")?;
    assert_eq!(fresh.0, ConstantIndex(size));
    assert_eq!(child.utf8_entry("fresh")?, fresh);
    assert_eq!(child.size(), size + 1);

    let long = child.long_entry(1 << 40)?;
    assert_eq!(child.size(), size + 3);
    assert!(child.constant(long).is_ok());
    assert!(child.constant(ConstantIndex(long.0 + 1)).is_err());
    Ok(())
}

#[test]
fn methods_added_through_a_child_pool() -> Result<(), Error> {
    let mut class = ClassFile::parse(&point_class()?.to_bytes()?)?;
    let mut pool = class.edit_constants();
    let method = build_method(
        &mut pool,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "greeting",
        "()Ljava/lang/String;",
        |code| {
            code.ldc_string("hello")?;
            code.return_value(TypeKind::Reference)
        },
    )?;
    class.methods.push(method);
    class.set_constants(pool)?;

    let bytes = class.to_bytes()?;
    let reparsed = ClassFile::parse(&bytes)?;
    assert_eq!(reparsed.to_bytes()?, bytes);
    assert_eq!(reparsed.methods.len(), 3);

    let greeting = &reparsed.methods[2];
    assert_eq!(greeting.name(&reparsed.constants)?, "greeting");
    assert_eq!(
        greeting.descriptor(&reparsed.constants)?,
        "()Ljava/lang/String;"
    );
    let code = greeting.code(&reparsed.constants)?.expect("greeting has code");
    let insn = CodeReader::new(&code.code_array.0).instruction_at(0)?;
    match insn.materialize()? {
        Instruction::Constant(_) => (),
        other => panic!("expected ldc, got {}", other),
    }
    assert_eq!(code.stack_map_table(&reparsed.constants)?, None);

    // The original methods still decode against the extended pool
    let max = reparsed.methods[1].code(&reparsed.constants)?.expect("max has code");
    assert_eq!(max.max_stack, 2);
    Ok(())
}

#[test]
fn truncated_and_corrupt_classes() -> Result<(), Error> {
    let bytes = point_class()?.to_bytes()?;

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0;
    assert!(matches!(
        ClassFile::parse(&bad_magic),
        Err(Error::MalformedClass(_))
    ));

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(matches!(
        ClassFile::parse(&trailing),
        Err(Error::MalformedClass(_))
    ));

    assert!(ClassFile::parse(&bytes[..bytes.len() - 3]).is_err());
    Ok(())
}
