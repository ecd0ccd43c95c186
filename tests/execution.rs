mod common;

use common::{main_class, ClassBuilder, MAIN_CLASS, MAIN_DESCRIPTOR};
use lava::error::{Error, FormatError, NotFoundError};
use lava::runtime::{ObjectRef, RuntimeErrorKind};
use lava::{
    run_bytes, run_file, Halt, RuntimeConfig, UnhandledOpcodePolicy, Value,
};

const CONFIG: RuntimeConfig = RuntimeConfig {
    unhandled_opcodes: UnhandledOpcodePolicy::Skip,
    max_instructions: None,
};

fn run(bytes: &[u8]) -> lava::Execution {
    run_bytes(bytes, &CONFIG).unwrap()
}

#[test]
fn new_allocates_one_object() {
    let [hi, lo] = MAIN_CLASS.to_be_bytes();
    let execution = run(&main_class(1, &[0xbb, hi, lo]));
    let outcome = execution.outcome;
    assert!(outcome.is_normal());
    assert_eq!(outcome.objects.len(), 1);
    assert_eq!(outcome.objects[0].class_index, MAIN_CLASS);
    assert_eq!(outcome.stack, vec![Value::Reference(ObjectRef(1))]);
    assert_eq!(execution.class_file.class_name(), Some("Main"));
}

#[test]
fn adds_two_constants() {
    let outcome = run(&main_class(2, &[0x06, 0x07, 0x60])).outcome;
    assert_eq!(outcome.stack, vec![Value::Int(7)]);
    assert_eq!(outcome.instructions_executed, 3);

    let outcome = run(&main_class(2, &[0x10, 0x03, 0x10, 0x04, 0x60])).outcome;
    assert_eq!(outcome.top(), Some(Value::Int(7)));
}

#[test]
fn rejects_bad_magic() {
    let bytes = ClassBuilder::new("Main").magic(0xDEAD_BEEF).build();
    let err = run_bytes(&bytes, &CONFIG).unwrap_err();
    assert!(matches!(
        err,
        Error::Format(FormatError::InvalidMagic(0xDEAD_BEEF))
    ));
}

#[test]
fn missing_main_fails_before_running() {
    let mut builder = ClassBuilder::new("Main");
    builder.method("helper", MAIN_DESCRIPTOR, Some((1, 1, &[0x04][..])));
    let err = run_bytes(&builder.build(), &CONFIG).unwrap_err();
    assert!(matches!(err, Error::NotFound(NotFoundError::Main)));
}

#[test]
fn main_without_code_is_not_found() {
    let mut builder = ClassBuilder::new("Main");
    builder.method("main", MAIN_DESCRIPTOR, None);
    let err = run_bytes(&builder.build(), &CONFIG).unwrap_err();
    assert!(matches!(err, Error::NotFound(NotFoundError::Code { .. })));
}

#[test]
fn truncated_class_files_are_format_errors() {
    let bytes = main_class(2, &[0x06, 0x07, 0x60]);
    for len in 0..bytes.len() {
        let err = run_bytes(&bytes[..len], &CONFIG).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{len} bytes: {err}");
    }
}

#[test]
fn rejects_trailing_bytes() {
    let mut bytes = main_class(2, &[0x06, 0x07, 0x60]);
    bytes.push(0x00);
    let err = run_bytes(&bytes, &CONFIG).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::TrailingBytes(1))));
}

#[test]
fn faults_are_reported_in_the_outcome() {
    let outcome = run(&main_class(2, &[0x04, 0x03, 0x6c])).outcome;
    match outcome.halt {
        Halt::Faulted(err) => {
            assert_eq!(
                err.kind,
                RuntimeErrorKind::Arithmetic("divide by zero")
            );
            assert_eq!(err.pc, 2);
        }
        Halt::Normal => panic!("expected a fault"),
    }
    assert!(outcome.stack.is_empty());
}

#[test]
fn strict_mode_faults_on_unhandled_opcodes() {
    // iconst_1, i2l
    let bytes = main_class(2, &[0x04, 0x85]);
    assert!(run(&bytes).outcome.is_normal());

    let outcome = run_bytes(&bytes, &RuntimeConfig::strict()).unwrap().outcome;
    assert!(matches!(
        outcome.halt,
        Halt::Faulted(ref err)
            if matches!(err.kind, RuntimeErrorKind::UnhandledOpcode(_))
    ));
}

#[test]
fn ireturn_records_return_value() {
    let mut builder = ClassBuilder::new("Main");
    let big = builder.integer(123_456);
    builder.method("main", "()I", Some((1, 0, &[0x12, big as u8, 0xac][..])));
    let outcome = run(&builder.build()).outcome;
    assert_eq!(outcome.return_value, Some(Value::Int(123_456)));
    assert!(outcome.stack.is_empty());
    assert!(outcome.locals.is_empty());
}

#[test]
fn runs_class_files_from_disk() {
    let name = format!("lava-{}-Main.class", std::process::id());
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, main_class(2, &[0x06, 0x07, 0x60])).unwrap();
    let result = run_file(&path, &CONFIG);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(result.unwrap().outcome.stack, vec![Value::Int(7)]);

    let err = run_file(&path, &CONFIG).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
