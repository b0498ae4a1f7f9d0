mod common;

use common::{setup, AuditEntry};
use std::time::Duration;
use tablemap_core::{DialectKind, Executor, KeylessMode, MapperConfig, MetadataRegistry};

#[test]
fn defaults_apply_to_missing_fields() {
    let config: MapperConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, MapperConfig::default());
    assert_eq!(config.dialect, DialectKind::Sqlite);
    assert_eq!(config.keyless_mode, KeylessMode::ByKey);
    assert_eq!(config.command_timeout(), None);
}

#[test]
fn snake_case_values_deserialize() {
    let config: MapperConfig = serde_json::from_str(
        r#"{"dialect":"sql_server","command_timeout_ms":1500,"keyless_mode":"whole_table"}"#,
    )
    .unwrap();
    assert_eq!(config.dialect, DialectKind::SqlServer);
    assert_eq!(config.command_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.keyless_mode, KeylessMode::WholeTable);

    let round = serde_json::to_value(&config).unwrap();
    assert_eq!(round["dialect"], "sql_server");
}

#[test]
fn registry_settings_flow_into_executors() {
    let registry = MetadataRegistry::new(&MapperConfig {
        command_timeout_ms: Some(200),
        keyless_mode: KeylessMode::WholeTable,
        ..MapperConfig::default()
    });
    assert_eq!(registry.dialect().name(), "sqlite");

    let audit = Executor::<AuditEntry>::new(&registry).unwrap();
    assert_eq!(audit.timeout(), Some(Duration::from_millis(200)));
    assert_eq!(audit.keyless_mode(), KeylessMode::WholeTable);

    let conn = setup();
    audit.insert(&conn, None, &AuditEntry::new("ann", "login")).unwrap();
    assert!(audit
        .delete_record(&conn, None, &AuditEntry::new("x", "y"))
        .unwrap());
    assert_eq!(audit.record_count(&conn, None, None).unwrap(), 0);
}
