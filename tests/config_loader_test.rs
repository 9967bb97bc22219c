//! Integration tests for loading project files from disk.

mod common;

use lokl::domain::models::{RestartPolicy, ServiceDefinition};
use lokl::infrastructure::config::{ConfigError, ConfigLoader};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

const SHOP: &str = r#"
version: 1
name: shop
env:
  RUST_LOG: info
proxy:
  domain: shop.test
  http_port: 18080
supervisor:
  max_restarts: 5
services:
  db:
    command: postgres -D data
    port: 5432
  api:
    command: cargo run
    path: ./api
    port: 3000
    host: api
    env:
      RUST_LOG: debug
    depends_on: [db]
    health:
      path: health
  web:
    command: npm run dev
    path: ./web
    port: 5173
    host: www.shop.test
    depends_on: [api]
    restart: always
"#;

#[test]
fn test_load_project_from_disk() {
    let (dir, path) = common::write_config(SHOP);
    let config = ConfigLoader::load(&path).unwrap();

    assert_eq!(config.name, "shop");
    assert_eq!(config.root, dir.path());
    assert_eq!(config.proxy.http_port, 18080);
    assert_eq!(config.proxy.https_port, 8443);
    assert_eq!(config.supervisor.max_restarts, Some(5));
    assert_eq!(config.socket_path(), dir.path().join(".lokl/lokl.sock"));

    let names: Vec<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["db", "api", "web"]);

    let api = config.service("api").unwrap();
    assert_eq!(api.hostname.as_deref(), Some("api.shop.test"));
    assert_eq!(api.working_dir.as_deref(), Some(dir.path().join("api").as_path()));
    assert_eq!(api.env.get("RUST_LOG").map(String::as_str), Some("debug"));
    let health = api.health.as_ref().unwrap();
    assert_eq!(health.path, "/health");
    assert_eq!(health.interval, Duration::from_secs(10));
    assert_eq!(health.timeout, Duration::from_millis(3000));
    assert_eq!(health.retries, 3);

    let db = config.service("db").unwrap();
    assert_eq!(db.env.get("RUST_LOG").map(String::as_str), Some("info"));
    assert_eq!(db.restart, RestartPolicy::OnFailure);
    assert!(db.hostname.is_none());

    assert_eq!(config.hostnames(), ["api.shop.test", "www.shop.test"]);
}

#[test]
fn test_missing_file() {
    let dir = common::temp_dir();
    let err = ConfigLoader::load(dir.path().join("lokl.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_unknown_field_rejected() {
    let (_dir, path) = common::write_config(
        r#"
name: shop
services:
  api:
    command: run
    prot: 3000
"#,
    );
    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
}

#[test]
fn test_cycle_rejected_before_anything_runs() {
    let (_dir, path) = common::write_config(
        r#"
name: loop
services:
  a:
    command: run-a
    depends_on: [b]
  b:
    command: run-b
    depends_on: [a]
"#,
    );
    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::DependencyCycle(_)), "{err}");
}

#[test]
fn test_duplicate_hostname_rejected() {
    let (_dir, path) = common::write_config(
        r#"
name: shop
proxy:
  domain: shop.test
services:
  a:
    command: run-a
    port: 3001
    host: app
  b:
    command: run-b
    port: 3002
    host: APP.shop.test
"#,
    );
    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateHostname { .. }), "{err}");
}

#[test]
fn test_duplicate_port_rejected() {
    let (_dir, path) = common::write_config(
        r#"
name: shop
services:
  a:
    command: run-a
    port: 3000
  b:
    command: run-b
    port: 3000
"#,
    );
    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicatePort { port: 3000, .. }), "{err}");
}

#[test]
fn test_host_without_port_rejected() {
    let (_dir, path) = common::write_config(
        r#"
name: shop
services:
  a:
    command: run-a
    host: a.shop.test
"#,
    );
    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::PortRequired { .. }), "{err}");
}

fn chain(size: usize, extra_edges: &[(usize, usize)]) -> Vec<ServiceDefinition> {
    (0..size)
        .map(|i| {
            let mut def = ServiceDefinition::new(format!("svc{i:02}"), "true");
            if i > 0 && i % 2 == 0 {
                def.depends_on.push(format!("svc{:02}", i - 1));
            }
            for &(from, to) in extra_edges {
                // Only edges pointing at lower indices, so the graph stays acyclic
                if from % size == i && to % size < i {
                    let dep = format!("svc{:02}", to % size);
                    if !def.depends_on.contains(&dep) {
                        def.depends_on.push(dep);
                    }
                }
            }
            def
        })
        .rev()
        .collect()
}

proptest! {
    /// Dependencies always come before their dependents.
    #[test]
    fn prop_start_order_respects_dependencies(
        size in 1usize..16,
        edges in prop::collection::vec((0usize..16, 0usize..16), 0..24)
    ) {
        let definitions = chain(size, &edges);
        let ordered = ConfigLoader::start_order(&definitions)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(ordered.len(), definitions.len());
        let position: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();

        for def in &ordered {
            for dep in &def.depends_on {
                prop_assert!(position[dep.as_str()] < position[def.name.as_str()]);
            }
        }
    }

    /// The order does not depend on the order definitions were given in.
    #[test]
    fn prop_start_order_is_deterministic(
        size in 1usize..12,
        edges in prop::collection::vec((0usize..12, 0usize..12), 0..16)
    ) {
        let definitions = chain(size, &edges);
        let mut shuffled = definitions.clone();
        shuffled.reverse();

        let a: Vec<String> = ConfigLoader::start_order(&definitions).unwrap().into_iter().map(|d| d.name).collect();
        let b: Vec<String> = ConfigLoader::start_order(&shuffled).unwrap().into_iter().map(|d| d.name).collect();
        prop_assert_eq!(a, b);
    }
}
