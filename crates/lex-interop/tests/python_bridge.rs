//! Integration tests against the embedded Python guest.
//!
//! These tests need a Python 3 interpreter. Tests that move pandas
//! DataFrames additionally need pandas and pyarrow, and are ignored by
//! default.

use lex_interop::{
    BridgeError, ConversionError, EnvironmentSpec, PythonRuntime, RuntimeAdapter, RuntimeId,
    Session, SessionManager, Value,
};
use polars::prelude::*;
use pretty_assertions::assert_eq;

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session() -> Session {
    init_tracing();
    SessionManager::default().start_session().unwrap()
}

fn execution_kind_of(session: &Session, code: &str) -> String {
    match session.execute(RuntimeId::Host, code) {
        Err(BridgeError::Execution(err)) => err.kind,
        other => panic!("expected a host execution error from `{code}`, got {other:?}"),
    }
}

fn guest_error(session: &Session, code: &str) -> lex_interop::ExecutionError {
    match session.execute(RuntimeId::Guest, code) {
        Err(BridgeError::Execution(err)) => err,
        other => panic!("expected a guest exception from `{code}`, got {other:?}"),
    }
}

// ============================================================================
// Reading and writing across the bridge
// ============================================================================

#[test]
fn test_guest_reads_host_binding() {
    let session = session();
    session
        .set(RuntimeId::Host, "greeting", Value::from("hello"))
        .unwrap();

    assert_eq!(
        session
            .execute(RuntimeId::Guest, "host.greeting.upper()")
            .unwrap(),
        Value::from("HELLO")
    );
    assert_eq!(
        session
            .execute(RuntimeId::Guest, "host['greeting']")
            .unwrap(),
        Value::from("hello")
    );
}

#[test]
fn test_guest_writes_host_binding() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "host.total = sum(range(5))")
        .unwrap();
    assert_eq!(session.get(RuntimeId::Host, "total").unwrap(), Value::from(10));

    session
        .execute(RuntimeId::Guest, "host['label'] = 'ok'")
        .unwrap();
    assert_eq!(session.get(RuntimeId::Host, "label").unwrap(), Value::from("ok"));
}

#[test]
fn test_host_reads_guest_structures() {
    let session = session();
    session
        .execute(
            RuntimeId::Guest,
            "data = {'a': [1, 2], 'b': {'flag': True, 'ratio': 0.5}, 'none': None}",
        )
        .unwrap();

    assert_eq!(
        session.execute(RuntimeId::Host, "guest.data.a").unwrap(),
        Value::Sequence(vec![Value::from(1), Value::from(2)])
    );
    assert_eq!(
        session.execute(RuntimeId::Host, "guest.data.b.ratio").unwrap(),
        Value::Float(0.5)
    );
    assert_eq!(
        session.read_other(RuntimeId::Host, "data").unwrap(),
        Value::mapping([
            ("a", Value::Sequence(vec![Value::from(1), Value::from(2)])),
            (
                "b",
                Value::mapping([("flag", Value::Boolean(true)), ("ratio", Value::Float(0.5))])
            ),
            ("none", Value::Null),
        ])
    );
}

#[test]
fn test_host_writes_into_guest_dict() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "cfg = {'mode': 'fast'}")
        .unwrap();
    session
        .execute(RuntimeId::Host, "guest.cfg.mode = \"slow\"")
        .unwrap();
    assert_eq!(
        session.execute(RuntimeId::Guest, "cfg['mode']").unwrap(),
        Value::from("slow")
    );
}

#[test]
fn test_guest_sees_live_values() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "view = host")
        .unwrap();

    session.set(RuntimeId::Host, "n", Value::from(1)).unwrap();
    assert_eq!(session.execute(RuntimeId::Guest, "view.n").unwrap(), Value::from(1));

    session.set(RuntimeId::Host, "n", Value::from(2)).unwrap();
    assert_eq!(session.execute(RuntimeId::Guest, "view.n").unwrap(), Value::from(2));
}

#[test]
fn test_dir_lists_host_names() {
    let session = session();
    session.set(RuntimeId::Host, "alpha", Value::from(1)).unwrap();
    assert_eq!(
        session
            .execute(RuntimeId::Guest, "'alpha' in dir(host) and 'guest' in dir(host)")
            .unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn test_chain_through_both_runtimes() {
    let session = session();
    session.set(RuntimeId::Host, "x", Value::from(7)).unwrap();
    assert_eq!(
        session
            .execute(RuntimeId::Guest, "host.guest.host.guest.host.x")
            .unwrap(),
        Value::from(7)
    );
    assert_eq!(
        session
            .execute(RuntimeId::Guest, "repr(host.guest)")
            .unwrap(),
        Value::from("<guest proxy>")
    );
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_host_name_raises_attribute_error() {
    let session = session();
    let err = guest_error(&session, "host.missing");
    assert_eq!(err.runtime, RuntimeId::Guest);
    assert_eq!(err.kind, "AttributeError");
    assert!(err.message.contains("missing"));

    assert_eq!(guest_error(&session, "host['missing']").kind, "KeyError");
}

#[test]
fn test_guest_can_catch_bridge_errors() {
    let session = session();
    let code = "\
try:
    host.missing
except AttributeError:
    outcome = 'caught'
outcome";
    assert_eq!(
        session.execute(RuntimeId::Guest, code).unwrap(),
        Value::from("caught")
    );
}

#[test]
fn test_guest_exception_is_preserved() {
    let session = session();
    let err = guest_error(&session, "1 / 0");
    assert_eq!(err.kind, "ZeroDivisionError");
    assert!(err.message.contains("division by zero"));
}

#[test]
fn test_failed_assignment_leaves_host_unchanged() {
    let session = session();
    let before = session.host().names();

    let err = guest_error(&session, "host.nope.child = 1");
    assert_eq!(err.kind, "AttributeError");
    assert_eq!(session.host().names(), before);
}

#[test]
fn test_proxy_outliving_session_raises() {
    let name = "lex_interop_leaked_proxy";
    {
        let session = session();
        session
            .execute(
                RuntimeId::Guest,
                &format!("import builtins; builtins.{name} = host"),
            )
            .unwrap();
    }

    let guest = PythonRuntime::new().unwrap();
    let err = guest.execute(&format!("{name}.anything")).unwrap_err();
    guest
        .execute(&format!("import builtins; del builtins.{name}"))
        .unwrap();

    let BridgeError::Execution(err) = err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(err.kind, "RuntimeError");
    assert!(err.message.contains("session closed"));
}

// ============================================================================
// Marshalling
// ============================================================================

#[test]
fn test_guest_integers_keep_64_bits() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "big = 3_000_000_000; huge = 2 ** 70")
        .unwrap();

    assert_eq!(
        session.read_other(RuntimeId::Host, "big").unwrap(),
        Value::Integer(3_000_000_000)
    );
    assert_eq!(
        session.read_other(RuntimeId::Host, "huge").unwrap(),
        Value::Float(2f64.powi(70))
    );

    session
        .execute(RuntimeId::Host, "copy = guest.big; guest.big2 = copy")
        .unwrap();
    assert_eq!(
        session.execute(RuntimeId::Guest, "big2 == big").unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn test_self_referencing_list_is_rejected() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "xs = [1]\nxs.append(xs)")
        .unwrap();

    assert_eq!(
        session.read_other(RuntimeId::Host, "xs").unwrap_err(),
        BridgeError::Conversion(ConversionError::Unsupported("recursive list".into()))
    );
    assert_eq!(
        execution_kind_of(&session, "guest.xs"),
        "ConversionError"
    );

    session
        .execute(RuntimeId::Guest, "d = {}\nd['me'] = d")
        .unwrap();
    assert_eq!(
        session.read_other(RuntimeId::Host, "d").unwrap_err(),
        BridgeError::Conversion(ConversionError::Unsupported("recursive dict".into()))
    );
}

#[test]
fn test_guest_object_stays_in_guest() {
    let session = session();
    session
        .execute(RuntimeId::Guest, "import threading; lock = threading.Lock()")
        .unwrap();

    assert!(matches!(
        session.read_other(RuntimeId::Host, "lock"),
        Err(BridgeError::Conversion(ConversionError::Unsupported(_)))
    ));
    assert!(matches!(
        session.get(RuntimeId::Guest, "lock"),
        Ok(Value::Opaque(_))
    ));
}

#[test]
fn test_table_without_pandas_arrives_as_columns() {
    let session = session();
    assert!(!session.capabilities().rich_tables);

    let df = df! { "id" => &[1i64, 2, 3], "label" => &["a", "b", "c"] }.unwrap();
    session.set(RuntimeId::Host, "df", Value::Table(df)).unwrap();

    assert_eq!(
        session
            .execute(RuntimeId::Guest, "type(host.df).__name__")
            .unwrap(),
        Value::from("dict")
    );
    assert_eq!(
        session.execute(RuntimeId::Guest, "host.df['label']").unwrap(),
        Value::Sequence(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );
}

#[test]
#[ignore = "Requires Python runtime with pandas"]
fn test_dataframe_without_rich_tables_reads_as_columns() {
    let session = session();
    assert!(!session.capabilities().rich_tables);
    session
        .execute(
            RuntimeId::Guest,
            "import pandas as pd; frame = pd.DataFrame({'id': [1, 2], 'label': ['a', 'b']})",
        )
        .unwrap();

    assert_eq!(
        session.read_other(RuntimeId::Host, "frame").unwrap(),
        Value::mapping([
            ("id", Value::Sequence(vec![Value::from(1), Value::from(2)])),
            ("label", Value::Sequence(vec![Value::from("a"), Value::from("b")])),
        ])
    );
}

#[test]
#[ignore = "Requires Python runtime with pyarrow and pandas"]
fn test_table_roundtrip_through_pandas() {
    init_tracing();
    let mut manager = SessionManager::default();
    manager
        .create_environment(EnvironmentSpec::new("analysis").with_packages(["pandas", "pyarrow"]))
        .unwrap();
    manager.activate_environment("analysis", true).unwrap();
    let session = manager.start_session().unwrap();
    assert!(session.capabilities().rich_tables);

    let df = df! { "id" => &[1i64, 2, 3], "label" => &["a", "b", "c"] }.unwrap();
    session.set(RuntimeId::Host, "df", Value::Table(df.clone())).unwrap();

    assert_eq!(
        session
            .execute(RuntimeId::Guest, "type(host.df).__name__")
            .unwrap(),
        Value::from("DataFrame")
    );
    session
        .execute(RuntimeId::Guest, "out = host.df.assign(double=host.df['id'] * 2)")
        .unwrap();

    let Value::Table(out) = session.read_other(RuntimeId::Host, "out").unwrap() else {
        panic!("expected a table");
    };
    assert_eq!(out.width(), 3);
    assert_eq!(out.height(), 3);
    assert_eq!(
        out.column("double")
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .to_vec(),
        vec![Some(2), Some(4), Some(6)]
    );
}
