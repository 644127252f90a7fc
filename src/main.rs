use classfile_codec::jvm::class_file::{Attribute, BytecodeArray, ClassFile, Code, StackMapTable};
use classfile_codec::jvm::code::dump_code;
use classfile_codec::jvm::verifier::{
    generate_stack_maps, ClassHierarchy, ClassHierarchyInfo, ClassHierarchyResolver,
    MethodContext,
};
use classfile_codec::jvm::{Error, Settings};

use clap::{crate_version, Arg, ArgAction, Command};
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("classfile-codec")
        .version(crate_version!())
        .about("Inspect JVM class files and regenerate their stack maps")
        .arg(
            Arg::new("INPUT")
                .help("Class file to read")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("FILE")
                .help("Write the (possibly rewritten) class to this file"),
        )
        .arg(
            Arg::new("regenerate-stack-maps")
                .long("regenerate-stack-maps")
                .action(ArgAction::SetTrue)
                .help("Recompute the `StackMapTable` of every method with code"),
        )
        .arg(
            Arg::new("no-patch-dead-code")
                .long("no-patch-dead-code")
                .action(ArgAction::SetTrue)
                .help("Fail on unreachable code instead of replacing it with `athrow`"),
        )
        .arg(
            Arg::new("no-fix-jumps")
                .long("no-fix-jumps")
                .action(ArgAction::SetTrue)
                .help("Fail on branches that don't fit in 16 bits instead of widening them"),
        )
        .arg(
            Arg::new("dump-pool")
                .long("dump-pool")
                .action(ArgAction::SetTrue)
                .help("Print the constant pool"),
        )
        .arg(
            Arg::new("dump-code")
                .long("dump-code")
                .action(ArgAction::SetTrue)
                .help("Print the instructions of every method"),
        )
        .get_matches();

    let settings = Settings {
        patch_dead_code: !matches.get_flag("no-patch-dead-code"),
        fix_short_jumps: !matches.get_flag("no-fix-jumps"),
        ..Settings::new()
    };

    let input = matches
        .get_one::<String>("INPUT")
        .ok_or_else(|| Error::MalformedClass("missing input".to_owned()))?;
    log::info!("Reading '{}'", input);
    let bytes = fs::read(input)?;
    let mut class = ClassFile::parse(&bytes)?;
    log::info!(
        "Parsed class '{}' (version {}.{})",
        class.name()?,
        class.version.major_version,
        class.version.minor_version
    );

    if matches.get_flag("dump-pool") {
        for entry in class.constants.iter() {
            println!("{:>5}: {:?}", entry.index(), entry.constant());
        }
    }

    if matches.get_flag("dump-code") {
        for method in &class.methods {
            let context = MethodContext::from_method(&class, method)?;
            match method.code(&class.constants)? {
                None => println!("{}: no code", context),
                Some(code) => {
                    let bytes = &code.code_array.0;
                    println!(
                        "{}: max_stack={} max_locals={}",
                        context, code.max_stack, code.max_locals
                    );
                    print!(
                        "{}",
                        dump_code(bytes, Some(&class.constants), bytes.len(), bytes.len())
                    );
                    for handler in &code.exception_table {
                        println!("  catch {:?}", handler);
                    }
                }
            }
        }
    }

    if matches.get_flag("regenerate-stack-maps") {
        regenerate_stack_maps(&mut class, &settings)?;
    }

    if let Some(output) = matches.get_one::<String>("output") {
        log::info!("Writing '{}'", output);
        class.save_to_path(output, true)?;
    }

    Ok(())
}

/// Resolver which knows the core `java/lang` classes and assumes everything else extends
/// `java/lang/Object`
fn lenient_resolver(class: &ClassFile) -> Result<impl ClassHierarchyResolver, Error> {
    let mut known = ClassHierarchy::with_java_lang();
    if let Some(super_name) = class.super_name()? {
        let info = ClassHierarchyInfo {
            is_interface: class.is_interface(),
            superclass: Some(super_name.to_owned()),
        };
        known.add(class.name()?, info);
    }
    Ok(move |name: &str| {
        known
            .resolve(name)
            .or_else(|| Some(ClassHierarchyInfo::class("java/lang/Object")))
    })
}

fn regenerate_stack_maps(class: &mut ClassFile, settings: &Settings) -> Result<(), Error> {
    let resolver = lenient_resolver(class)?;
    let mut pool = class.edit_constants();

    for index in 0..class.methods.len() {
        let method = &class.methods[index];
        let code = match method.code(&pool)? {
            Some(code) => code,
            None => continue,
        };
        let context = MethodContext::from_method(class, method)?;
        let generated = generate_stack_maps(
            &context,
            &code.code_array.0,
            &code.exception_table,
            &mut pool,
            &resolver,
            settings,
        )?;
        log::debug!(
            "{}: max_stack {} -> {}, max_locals {} -> {}",
            context,
            code.max_stack,
            generated.max_stack,
            code.max_locals,
            generated.max_locals
        );

        let mut attributes: Vec<Attribute> = code
            .attributes
            .into_iter()
            .filter(|attribute| !attribute.is::<StackMapTable>(&pool))
            .collect();
        if let Some(table) = &generated.stack_map_table {
            attributes.push(pool.attribute(table)?);
        }
        let code = Code {
            max_stack: generated.max_stack,
            max_locals: generated.max_locals,
            code_array: BytecodeArray(generated.code),
            exception_table: generated.exception_table,
            attributes,
        };
        class.methods[index].set_code(&mut pool, &code)?;
    }

    class.set_constants(pool)?;
    log::info!("Regenerated stack maps for '{}'", class.name()?);
    Ok(())
}
