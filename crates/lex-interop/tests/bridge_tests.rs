//! End-to-end tests of the bridge with an in-memory guest.
//!
//! The guest here is a second `HostRuntime` reporting `RuntimeId::Guest`, so
//! these tests exercise session wiring, proxies and marshalling without an
//! embedded interpreter.

use std::sync::Arc;

use lex_interop::{
    AssignmentError, BridgeConfig, BridgeError, ConversionError, Environment, EnvironmentError,
    EnvironmentSpec, GuestFactory, HostObject, HostRuntime, LookupError, OpaqueValue,
    RuntimeAdapter, RuntimeId, RuntimeProfile, Session, SessionError, SessionManager, Value,
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

fn memory_guest() -> GuestFactory {
    Arc::new(
        |_: Option<&Environment>,
         _: &BridgeConfig|
         -> Result<Arc<dyn RuntimeAdapter>, SessionError> {
            Ok(Arc::new(HostRuntime::with_id(RuntimeId::Guest)))
        },
    )
}

fn manager() -> SessionManager {
    SessionManager::new(BridgeConfig::default()).with_guest_factory(memory_guest())
}

fn session() -> Session {
    init_tracing();
    manager().start_session().unwrap()
}

fn rich_session() -> Session {
    init_tracing();
    let mut manager = manager();
    manager
        .create_environment(EnvironmentSpec::new("tables").with_packages(["pandas", "pyarrow"]))
        .unwrap();
    manager.activate_environment("tables", true).unwrap();
    manager.start_session().unwrap()
}

/// Kind of the execution error `err` wraps; `execute` reports every failure
/// as an `ExecutionError`.
fn execution_kind(err: BridgeError) -> String {
    match err {
        BridgeError::Execution(err) => err.kind,
        other => panic!("expected execution error, got {other:?}"),
    }
}

fn sample_table() -> DataFrame {
    df! {
        "id" => &[1i64, 2, 3],
        "label" => &["a", "b", "c"],
        "score" => &[0.5f64, 1.5, 2.5],
    }
    .unwrap()
}

#[derive(Debug)]
struct Connection;

impl HostObject for Connection {
    fn type_tag(&self) -> &str {
        "Connection"
    }

    fn member(&self, name: &str) -> Option<Value> {
        (name == "url").then(|| Value::from("db://local"))
    }

    fn member_names(&self) -> Vec<String> {
        vec!["url".to_string()]
    }
}

// ============================================================================
// Scalars and live views
// ============================================================================

#[test]
fn test_scalars_survive_the_crossing() {
    let session = session();
    let scalars = [
        Value::Null,
        Value::Boolean(false),
        Value::Integer(-42),
        Value::Integer(3_000_000_000),
        Value::Integer(i64::MIN),
        Value::Float(3.25),
        Value::from("naïve café"),
        Value::Sequence(vec![]),
    ];

    for (i, value) in scalars.into_iter().enumerate() {
        let name = format!("v{i}");
        session.set(RuntimeId::Host, &name, value.clone()).unwrap();
        assert_eq!(session.read_other(RuntimeId::Guest, &name).unwrap(), value);

        session.set(RuntimeId::Guest, &name, value.clone()).unwrap();
        assert_eq!(session.read_other(RuntimeId::Host, &name).unwrap(), value);
    }
}

#[test]
fn test_wide_integer_survives_host_copy() {
    let session = session();
    session
        .set(RuntimeId::Guest, "id", Value::Integer(3_000_000_000))
        .unwrap();
    session
        .execute(RuntimeId::Host, "copy = guest.id; guest.id2 = copy")
        .unwrap();
    assert_eq!(
        session.get(RuntimeId::Guest, "id2").unwrap(),
        Value::Integer(3_000_000_000)
    );
}

#[test]
fn test_reads_observe_latest_value() {
    let session = session();
    session.set(RuntimeId::Host, "counter", Value::from(1)).unwrap();
    assert_eq!(
        session.read_other(RuntimeId::Guest, "counter").unwrap(),
        Value::from(1)
    );

    session.set(RuntimeId::Host, "counter", Value::from(2)).unwrap();
    assert_eq!(
        session.read_other(RuntimeId::Guest, "counter").unwrap(),
        Value::from(2)
    );
}

#[test]
fn test_writes_are_visible_both_ways() {
    let session = session();
    session
        .write_other(RuntimeId::Host, "from_host", Value::from("h"))
        .unwrap();
    session
        .write_other(RuntimeId::Guest, "from_guest", Value::from("g"))
        .unwrap();

    assert_eq!(session.get(RuntimeId::Guest, "from_host").unwrap(), Value::from("h"));
    assert_eq!(session.get(RuntimeId::Host, "from_guest").unwrap(), Value::from("g"));
}

#[test]
fn test_missing_name_reports_runtime() {
    let session = session();
    assert_eq!(
        session.read_other(RuntimeId::Host, "nothing").unwrap_err(),
        BridgeError::Lookup(LookupError::NotFound {
            runtime: RuntimeId::Guest,
            name: "nothing".into(),
        })
    );
}

#[test]
fn test_sequence_navigation_is_not_indexable() {
    let session = session();
    session
        .set(RuntimeId::Guest, "items", Value::Sequence(vec![Value::from(1)]))
        .unwrap();
    let path = session
        .root_proxy(RuntimeId::Host)
        .unwrap()
        .child("items")
        .child("first");
    let err = session.resolver().read(&path, RuntimeId::Host).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Lookup(LookupError::NotIndexable {
            runtime: RuntimeId::Guest,
            name: "first".into(),
            kind: "sequence".into(),
        })
    );
    assert_eq!(
        execution_kind(session.execute(RuntimeId::Host, "guest.items.first").unwrap_err()),
        "LookupError"
    );
}

// ============================================================================
// Proxy chains
// ============================================================================

#[test]
fn test_chains_of_any_depth_resolve() {
    let session = session();
    session.set(RuntimeId::Host, "x", Value::from(7)).unwrap();

    for depth in [0usize, 1, 2, 4, 8] {
        let mut path = vec!["guest", "host"].repeat(depth);
        path.push("x");
        let expr = path.join(".");
        assert_eq!(
            session.execute(RuntimeId::Host, &expr).unwrap(),
            Value::from(7),
            "chain `{expr}`"
        );
    }
}

#[test]
fn test_deep_chain_observes_rebinding() {
    let session = session();
    let mut path = vec!["guest", "host"].repeat(8);
    path.push("greeting");
    let expr = path.join(".");

    session
        .set(RuntimeId::Host, "greeting", Value::from("hello"))
        .unwrap();
    assert_eq!(session.execute(RuntimeId::Host, &expr).unwrap(), Value::from("hello"));

    session
        .set(RuntimeId::Host, "greeting", Value::from("goodbye"))
        .unwrap();
    assert_eq!(
        session.execute(RuntimeId::Host, &expr).unwrap(),
        Value::from("goodbye")
    );

    let from_guest = format!("host.{expr}");
    assert_eq!(
        session.execute(RuntimeId::Guest, &from_guest).unwrap(),
        Value::from("goodbye")
    );
}

#[test]
fn test_chain_write_lands_in_owner() {
    let session = session();
    session
        .execute(RuntimeId::Host, "guest.host.guest.target = 5")
        .unwrap();
    assert_eq!(session.get(RuntimeId::Guest, "target").unwrap(), Value::from(5));
}

#[test]
fn test_nested_write_through_mapping() {
    let session = session();
    session
        .set(RuntimeId::Guest, "cfg", Value::mapping([("mode", Value::from("fast"))]))
        .unwrap();
    session
        .execute(RuntimeId::Host, "guest.cfg.mode = \"slow\"")
        .unwrap();
    assert_eq!(
        session.get(RuntimeId::Guest, "cfg").unwrap(),
        Value::mapping([("mode", Value::from("slow"))])
    );
}

#[test]
fn test_root_proxy_names() {
    let session = session();
    session.set(RuntimeId::Guest, "alpha", Value::from(1)).unwrap();
    let root = session.root_proxy(RuntimeId::Host).unwrap();
    let names = session.resolver().names(&root).unwrap();
    assert!(names.contains(&"alpha".to_string()));
    assert!(names.contains(&"host".to_string()));
}

// ============================================================================
// Tables
// ============================================================================

#[test]
fn test_table_roundtrip_with_rich_tables() {
    let session = rich_session();
    assert!(session.capabilities().rich_tables);

    let df = sample_table();
    session.set(RuntimeId::Host, "df", Value::Table(df.clone())).unwrap();

    let seen = session.read_other(RuntimeId::Guest, "df").unwrap();
    assert_eq!(seen, Value::Table(df.clone()));

    session.write_other(RuntimeId::Guest, "df_copy", seen).unwrap();
    assert_eq!(session.get(RuntimeId::Host, "df_copy").unwrap(), Value::Table(df));
}

#[test]
fn test_table_degrades_to_columns_without_rich_tables() {
    let session = session();
    assert!(!session.capabilities().rich_tables);

    let df = sample_table();
    session.set(RuntimeId::Host, "df", Value::Table(df.clone())).unwrap();

    let seen = session.read_other(RuntimeId::Guest, "df").unwrap();
    let Value::Mapping(columns) = &seen else {
        panic!("expected mapping of columns, got {seen:?}");
    };
    assert_eq!(
        columns.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["id", "label", "score"]
    );

    let back = session
        .resolver()
        .marshaller()
        .convert_table(&seen, RuntimeId::Guest, RuntimeId::Host)
        .unwrap();
    assert_eq!(back, Value::Table(df));
}

#[test]
fn test_column_access_through_proxy() {
    let session = session();
    session.set(RuntimeId::Guest, "df", Value::Table(sample_table())).unwrap();
    assert_eq!(
        session.execute(RuntimeId::Host, "guest.df.id").unwrap(),
        Value::Sequence(vec![Value::from(1), Value::from(2), Value::from(3)])
    );
}

#[test]
fn test_ragged_columns_are_rejected_as_table() {
    let session = session();
    let ragged = Value::mapping([
        ("a", Value::Sequence(vec![Value::from(1), Value::from(2)])),
        ("b", Value::Sequence(vec![Value::from(1)])),
    ]);
    let err = session
        .resolver()
        .marshaller()
        .convert_table(&ragged, RuntimeId::Guest, RuntimeId::Host)
        .unwrap_err();
    assert_eq!(
        err,
        ConversionError::RaggedTable {
            column: "b".into(),
            expected: 2,
            found: 1,
        }
    );
}

#[test]
fn test_column_assignment_checks_length() {
    let session = session();
    session.set(RuntimeId::Host, "df", Value::Table(sample_table())).unwrap();

    session
        .execute(RuntimeId::Guest, "host.df.flag = [true, false, true]")
        .unwrap();
    let Value::Table(df) = session.get(RuntimeId::Host, "df").unwrap() else {
        panic!("df is no longer a table");
    };
    assert_eq!(df.width(), 4);

    let err = session
        .execute(RuntimeId::Guest, "host.df.short = [1]")
        .unwrap_err();
    assert_eq!(execution_kind(err), "AssignmentError");
}

// ============================================================================
// Marshalling edge cases
// ============================================================================

#[test]
fn test_wide_integer_arrives_as_float() {
    init_tracing();
    let config = BridgeConfig::builder()
        .host_profile(RuntimeProfile::with_integer_bits(32))
        .build()
        .unwrap();
    let session = SessionManager::new(config)
        .with_guest_factory(memory_guest())
        .start_session()
        .unwrap();
    let wide = 1i64 << 40;
    session.set(RuntimeId::Guest, "big", Value::Integer(wide)).unwrap();

    assert_eq!(
        session.read_other(RuntimeId::Host, "big").unwrap(),
        Value::Float(wide as f64)
    );

    let reported = session
        .resolver()
        .marshaller()
        .convert_reporting(&Value::Integer(wide), RuntimeId::Guest, RuntimeId::Host)
        .unwrap();
    assert!(reported.precision_loss);
}

#[test]
fn test_opaque_value_cannot_cross() {
    let session = session();
    session
        .set(
            RuntimeId::Host,
            "conn",
            Value::Opaque(OpaqueValue::host(Arc::new(Connection))),
        )
        .unwrap();

    assert_eq!(
        session.read_other(RuntimeId::Guest, "conn").unwrap_err(),
        BridgeError::Conversion(ConversionError::Unsupported("Connection".into()))
    );
    assert_eq!(
        session.execute(RuntimeId::Guest, "host.conn.url").unwrap(),
        Value::from("db://local")
    );
}

// ============================================================================
// Assignment failures
// ============================================================================

#[test]
fn test_failed_set_leaves_namespace_unchanged() {
    let session = session();
    session.set(RuntimeId::Guest, "keep", Value::from(1)).unwrap();
    let before = session.guest().unwrap().names();

    let err = session
        .execute(RuntimeId::Host, "guest.missing.child = 3")
        .unwrap_err();
    assert_eq!(execution_kind(err), "LookupError");
    assert_eq!(session.guest().unwrap().names(), before);
    assert_eq!(session.get(RuntimeId::Guest, "keep").unwrap(), Value::from(1));
}

#[test]
fn test_locked_binding_rejects_writes() {
    let session = session();
    session.set(RuntimeId::Host, "frozen", Value::from(1)).unwrap();
    session.host().lock_binding("frozen");

    let err = session
        .write_other(RuntimeId::Guest, "frozen", Value::from(2))
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::Assignment(AssignmentError::Locked {
            runtime: RuntimeId::Host,
            name: "frozen".into(),
        })
    );
    assert_eq!(session.get(RuntimeId::Host, "frozen").unwrap(), Value::from(1));

    assert!(session.host().unlock_binding("frozen"));
    session
        .write_other(RuntimeId::Guest, "frozen", Value::from(2))
        .unwrap();
}

#[test]
fn test_execution_error_keeps_runtime_message() {
    let session = session();
    let err = session.execute(RuntimeId::Guest, "{not json").unwrap_err();
    let BridgeError::Execution(err) = err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(err.runtime, RuntimeId::Guest);
    assert_eq!(err.kind, "SyntaxError");
    assert!(err.message.contains("{not json"));
}

// ============================================================================
// Environments and session gate
// ============================================================================

#[test]
fn test_required_activation_failure_blocks_start() {
    let mut manager = manager();
    assert!(manager.activate_environment("ghost", true).is_err());
    assert_eq!(
        manager.start_session().unwrap_err(),
        SessionError::ActivationRequired(EnvironmentError::NotFound("ghost".into()))
    );

    // A later success does not reopen a closed gate.
    manager.create_environment(EnvironmentSpec::new("ghost")).unwrap();
    manager.activate_environment("ghost", true).unwrap();
    assert!(matches!(
        manager.start_session(),
        Err(SessionError::ActivationRequired(_))
    ));
}

#[test]
fn test_best_effort_activation_starts_without_guest() {
    let mut manager = manager();
    assert!(manager.activate_environment("ghost", false).is_err());
    let session = manager.start_session().unwrap();

    assert!(session.guest().is_none());
    assert_eq!(
        session.read_other(RuntimeId::Host, "x").unwrap_err(),
        BridgeError::RuntimeUnavailable(RuntimeId::Guest)
    );
    assert_eq!(
        session.execute(RuntimeId::Guest, "1").unwrap_err(),
        BridgeError::RuntimeUnavailable(RuntimeId::Guest)
    );
    session.set(RuntimeId::Host, "x", Value::from(1)).unwrap();
    assert_eq!(session.get(RuntimeId::Host, "x").unwrap(), Value::from(1));
}

#[test]
fn test_best_effort_failure_recovered_by_later_activation() {
    let mut manager = manager();
    assert!(manager.activate_environment("late", false).is_err());
    manager.create_environment(EnvironmentSpec::new("late")).unwrap();
    manager.activate_environment("late", false).unwrap();

    let session = manager.start_session().unwrap();
    assert!(session.guest().is_some());
    assert_eq!(session.environment(), Some("late"));
}

#[test]
fn test_session_starts_once_per_manager() {
    let mut manager = manager();
    let first = manager.start_session().unwrap();
    drop(first);
    assert_eq!(manager.start_session().unwrap_err(), SessionError::AlreadyStarted);
}

#[test]
fn test_custom_root_names() {
    init_tracing();
    let config = BridgeConfig::builder()
        .host_root_name("py")
        .guest_root_name("rs")
        .build()
        .unwrap();
    let session = SessionManager::new(config)
        .with_guest_factory(memory_guest())
        .start_session()
        .unwrap();

    session.set(RuntimeId::Guest, "x", Value::from(3)).unwrap();
    assert_eq!(session.execute(RuntimeId::Host, "py.rs.py.x").unwrap(), Value::from(3));
}
