use classfile_codec::jvm::class_file::{
    Code, ConstantPool, ExceptionHandler, StackMapFrame, VerificationType,
};
use classfile_codec::jvm::code::{opcodes, CodeBuilder, CodeReader, TypeKind};
use classfile_codec::jvm::verifier::{
    ClassHierarchy, ClassHierarchyInfo, ClassHierarchyResolver, MethodContext,
};
use classfile_codec::jvm::{Error, Settings};

fn static_method(descriptor: &str) -> MethodContext {
    MethodContext::new("demo/Scenarios", "scenario", descriptor, true)
}

fn frames(code: &Code, pool: &ConstantPool) -> Vec<StackMapFrame> {
    code.stack_map_table(pool)
        .unwrap()
        .map(|table| table.0)
        .unwrap_or_default()
}

#[test]
fn counting_loop() {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new(&mut pool, static_method("(I)I"), Settings::new());
    let head = code.new_label();
    let exit = code.new_label();
    code.iconst(0).unwrap();
    code.store(TypeKind::Int, 1).unwrap();
    code.iconst(0).unwrap();
    code.store(TypeKind::Int, 2).unwrap();
    code.bind(head).unwrap();
    code.load(TypeKind::Int, 2).unwrap();
    code.load(TypeKind::Int, 0).unwrap();
    code.branch(opcodes::IF_ICMPGE, exit).unwrap();
    code.load(TypeKind::Int, 1).unwrap();
    code.load(TypeKind::Int, 2).unwrap();
    code.operator(opcodes::IADD).unwrap();
    code.store(TypeKind::Int, 1).unwrap();
    code.iinc(2, 1).unwrap();
    code.goto(head).unwrap();
    code.bind(exit).unwrap();
    code.load(TypeKind::Int, 1).unwrap();
    code.return_value(TypeKind::Int).unwrap();
    let code = code.build(&ClassHierarchy::with_java_lang()).unwrap();

    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 3);
    assert_eq!(code.code_array.0.len(), 21);
    assert_eq!(
        frames(&code, &pool),
        vec![
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 4,
                locals: vec![VerificationType::Integer, VerificationType::Integer],
            },
            StackMapFrame::SameLocalsNoStack { offset_delta: 14 },
        ]
    );
}

#[test]
fn loop_local_widens_on_back_edge() {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new(&mut pool, static_method("(I)V"), Settings::new());
    let head = code.new_label();
    let exit = code.new_label();
    code.ldc_string("start").unwrap();
    code.store(TypeKind::Reference, 1).unwrap();
    code.iconst(0).unwrap();
    code.store(TypeKind::Int, 2).unwrap();
    code.bind(head).unwrap();
    code.load(TypeKind::Int, 2).unwrap();
    code.load(TypeKind::Int, 0).unwrap();
    code.branch(opcodes::IF_ICMPGE, exit).unwrap();
    code.load(TypeKind::Int, 2).unwrap();
    code.invoke(
        opcodes::INVOKESTATIC,
        "java/lang/Integer",
        "valueOf",
        "(I)Ljava/lang/Integer;",
        false,
    )
    .unwrap();
    code.store(TypeKind::Reference, 1).unwrap();
    code.iinc(2, 1).unwrap();
    code.goto(head).unwrap();
    code.bind(exit).unwrap();
    code.return_value(TypeKind::Void).unwrap();
    let code = code.build(&ClassHierarchy::with_java_lang()).unwrap();

    // Slot 1 holds a `String` on entry and an `Integer` along the back edge
    let object = pool.class_entry_by_name("java/lang/Object").unwrap();
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 3);
    assert_eq!(code.code_array.0.len(), 22);
    assert_eq!(
        frames(&code, &pool),
        vec![
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 5,
                locals: vec![VerificationType::Object(object), VerificationType::Integer],
            },
            StackMapFrame::SameLocalsNoStack { offset_delta: 15 },
        ]
    );
}

#[test]
fn sparse_table_switch() {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new(&mut pool, static_method("(I)I"), Settings::new());
    let three = code.new_label();
    let five = code.new_label();
    let default = code.new_label();
    code.load(TypeKind::Int, 0).unwrap();
    code.table_switch(2, 5, default, vec![(3, three), (5, five)])
        .unwrap();
    code.bind(three).unwrap();
    code.iconst(3).unwrap();
    code.return_value(TypeKind::Int).unwrap();
    code.bind(five).unwrap();
    code.iconst(5).unwrap();
    code.return_value(TypeKind::Int).unwrap();
    code.bind(default).unwrap();
    code.iconst(-1).unwrap();
    code.return_value(TypeKind::Int).unwrap();
    let code = code.build(&ClassHierarchy::with_java_lang()).unwrap();

    // iload_0, then the switch padded to offset 4: default, low, high, and 4 jump offsets
    let switch_end = 4 + 12 + 4 * 4;
    let (three_at, five_at, default_at) = (switch_end, switch_end + 2, switch_end + 4);

    let bytes = &code.code_array.0;
    let targets = CodeReader::new(bytes).instruction_at(1).unwrap().switch_targets();
    assert_eq!(targets.default, default_at);
    assert_eq!(
        targets.cases,
        vec![
            (2, default_at),
            (3, three_at),
            (4, default_at),
            (5, five_at)
        ]
    );

    assert_eq!(
        frames(&code, &pool),
        vec![
            StackMapFrame::SameLocalsNoStack {
                offset_delta: three_at as u16
            },
            StackMapFrame::SameLocalsNoStack { offset_delta: 1 },
            StackMapFrame::SameLocalsNoStack { offset_delta: 1 },
        ]
    );
}

#[test]
fn branches_merge_to_common_superclass() {
    let resolver = |name: &str| match name {
        "demo/Shape" => Some(ClassHierarchyInfo::class("java/lang/Object")),
        "demo/Circle" | "demo/Square" => Some(ClassHierarchyInfo::class("demo/Shape")),
        "java/lang/Object" => Some(ClassHierarchyInfo {
            is_interface: false,
            superclass: None,
        }),
        _ => None,
    };
    assert!(resolver.resolve("demo/Triangle").is_none());

    let mut pool = ConstantPool::new();
    let descriptor = "(ZLdemo/Circle;Ldemo/Square;)Ldemo/Shape;";
    let mut code = CodeBuilder::new(&mut pool, static_method(descriptor), Settings::new());
    let square = code.new_label();
    let done = code.new_label();
    code.load(TypeKind::Int, 0).unwrap();
    code.branch(opcodes::IFEQ, square).unwrap();
    code.load(TypeKind::Reference, 1).unwrap();
    code.goto(done).unwrap();
    code.bind(square).unwrap();
    code.load(TypeKind::Reference, 2).unwrap();
    code.bind(done).unwrap();
    code.return_value(TypeKind::Reference).unwrap();
    let code = code.build(&resolver).unwrap();

    let shape = pool.class_entry_by_name("demo/Shape").unwrap();
    assert_eq!(
        frames(&code, &pool),
        vec![
            StackMapFrame::SameLocalsNoStack { offset_delta: 8 },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 0,
                stack: VerificationType::Object(shape),
            },
        ]
    );
}

#[test]
fn unknown_classes_fail_to_merge() {
    let mut pool = ConstantPool::new();
    let descriptor = "(ZLdemo/Circle;Ldemo/Square;)Ljava/lang/Object;";
    let mut code = CodeBuilder::new(&mut pool, static_method(descriptor), Settings::new());
    let square = code.new_label();
    let done = code.new_label();
    code.load(TypeKind::Int, 0).unwrap();
    code.branch(opcodes::IFEQ, square).unwrap();
    code.load(TypeKind::Reference, 1).unwrap();
    code.goto(done).unwrap();
    code.bind(square).unwrap();
    code.load(TypeKind::Reference, 2).unwrap();
    code.bind(done).unwrap();
    code.return_value(TypeKind::Reference).unwrap();
    assert!(matches!(
        code.build(&ClassHierarchy::with_java_lang()),
        Err(Error::UnresolvedClass(_))
    ));
}

#[test]
fn exception_handlers_get_frames() {
    let mut pool = ConstantPool::new();
    let mut code = CodeBuilder::new(&mut pool, static_method("()V"), Settings::new());
    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    let done = code.new_label();
    code.bind(start).unwrap();
    code.invoke(opcodes::INVOKESTATIC, "demo/Util", "run", "()V", false)
        .unwrap();
    code.bind(end).unwrap();
    code.goto(done).unwrap();
    code.bind(handler).unwrap();
    code.store(TypeKind::Reference, 0).unwrap();
    code.bind(done).unwrap();
    code.return_value(TypeKind::Void).unwrap();
    code.exception_catch(start, end, handler, Some("java/lang/Exception"))
        .unwrap();
    let code = code.build(&ClassHierarchy::with_java_lang()).unwrap();

    let exception = pool.class_entry_by_name("java/lang/Exception").unwrap();
    assert_eq!(
        code.exception_table,
        vec![ExceptionHandler {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 6,
            catch_type: Some(exception),
        }]
    );
    assert_eq!(code.max_stack, 1);
    assert_eq!(code.max_locals, 1);
    assert_eq!(
        frames(&code, &pool)[0],
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 6,
            stack: VerificationType::Object(exception),
        }
    );
}

#[test]
fn objects_are_initialized_by_their_constructor() {
    let mut pool = ConstantPool::new();
    let descriptor = "(Z)Ljava/lang/Object;";
    let mut code = CodeBuilder::new(&mut pool, static_method(descriptor), Settings::new());
    let skip = code.new_label();
    code.new_object("java/lang/StringBuilder").unwrap();
    code.stack(opcodes::DUP).unwrap();
    code.load(TypeKind::Int, 0).unwrap();
    code.branch(opcodes::IFEQ, skip).unwrap();
    code.bind(skip).unwrap();
    code.invoke(
        opcodes::INVOKESPECIAL,
        "java/lang/StringBuilder",
        "<init>",
        "()V",
        false,
    )
    .unwrap();
    code.return_value(TypeKind::Reference).unwrap();
    let code = code.build(&ClassHierarchy::with_java_lang()).unwrap();

    // The frame at the branch target still carries the uninitialized object from offset 0
    assert_eq!(code.max_stack, 3);
    assert_eq!(
        frames(&code, &pool),
        vec![StackMapFrame::Full {
            offset_delta: 8,
            locals: vec![VerificationType::Integer],
            stack: vec![
                VerificationType::Uninitialized(0),
                VerificationType::Uninitialized(0)
            ],
        }]
    );
}

#[test]
fn unreachable_code_is_patched() {
    let build = |patch_dead_code: bool| {
        let mut pool = ConstantPool::new();
        let settings = Settings {
            patch_dead_code,
            ..Settings::new()
        };
        let mut code = CodeBuilder::new(&mut pool, static_method("()V"), settings);
        let done = code.new_label();
        code.goto(done).unwrap();
        code.iconst(1).unwrap();
        code.stack(opcodes::POP).unwrap();
        code.bind(done).unwrap();
        code.return_value(TypeKind::Void).unwrap();
        code.build(&ClassHierarchy::with_java_lang())
            .map(|code| (code.clone(), frames(&code, &pool)))
    };

    let (code, frames) = build(true).unwrap();
    assert_eq!(
        code.code_array.0,
        vec![
            opcodes::GOTO,
            0,
            5,
            opcodes::NOP,
            opcodes::ATHROW,
            opcodes::RETURN
        ]
    );
    assert_eq!(frames.len(), 2);
    assert!(matches!(
        frames[0],
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 3,
            stack: VerificationType::Object(_),
        }
    ));

    assert!(matches!(
        build(false),
        Err(Error::DeadCode { offset: 3, .. })
    ));
}
