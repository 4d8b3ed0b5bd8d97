//! 여러 벤치가 한 부모 디렉토리를 공유하는 시나리오 통합 테스트
//!
//! 1. 벤치를 차례로 setup 하면 포트가 겹치지 않고 1씩 증가
//! 2. 기존 벤치의 포트는 다시 setup 해도 유지
//! 3. setup 결과로 Procfile 생성

use bench_config::{config, procfile, PortAllocator, PortName, ProcfileOptions, SetupOptions};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn setup_options(base: &Path) -> SetupOptions {
    SetupOptions {
        base_dir: base.to_path_buf(),
        frappe_user: "frappe".to_string(),
        cpu_count: 2,
        additional: None,
    }
}

// ═══════════════════════════════════════════════════════
// 테스트 1: 연속 setup
// ═══════════════════════════════════════════════════════

#[test]
fn test_sequential_benches_get_distinct_ports() {
    let tmp = TempDir::new().unwrap();
    let opts = setup_options(tmp.path());

    let mut seen = Vec::new();
    for name in ["bench-1", "bench-2", "bench-3"] {
        let bench = tmp.path().join(name);
        fs::create_dir_all(&bench).unwrap();
        let site = config::setup_config(&bench, &opts).unwrap();
        seen.push(site);
    }

    let webservers: Vec<_> = seen.iter().map(|s| s.webserver_port).collect();
    assert_eq!(webservers, vec![Some(8000), Some(8001), Some(8002)]);

    let queues: Vec<_> = seen.iter().map(|s| s.port(PortName::RedisQueue)).collect();
    assert_eq!(queues, vec![Some(11000), Some(11001), Some(11002)]);

    for site in &seen {
        assert_eq!(site.port(PortName::RedisSocketio), site.port(PortName::RedisCache));
    }

    println!("✓ Sequential setup allocated distinct ports");
}

// ═══════════════════════════════════════════════════════
// 테스트 2: 재실행 시 기존 포트 유지
// ═══════════════════════════════════════════════════════

#[test]
fn test_rerun_setup_keeps_existing_ports() {
    let tmp = TempDir::new().unwrap();
    let opts = setup_options(tmp.path());
    let bench = tmp.path().join("frappe-bench");
    fs::create_dir_all(&bench).unwrap();

    let first = config::setup_config(&bench, &opts).unwrap();
    let second = config::setup_config(&bench, &opts).unwrap();
    assert_eq!(first, second);

    // 새 벤치를 추가하기 전 제안값은 기존 최대 + 1
    let proposal = PortAllocator::new(tmp.path()).allocate().unwrap();
    assert_eq!(proposal.webserver, 8001);
    assert_eq!(proposal.redis_cache, 13001);
    assert_eq!(proposal.redis_socketio, 13001);
}

#[test]
fn test_sibling_with_foreign_keys_is_round_tripped() {
    let tmp = TempDir::new().unwrap();
    let legacy = tmp.path().join("legacy-bench");
    fs::create_dir_all(legacy.join("sites")).unwrap();
    let raw = json!({
        "webserver_port": 8010,
        "redis_socketio": "redis://127.0.0.1:12000",
        "maintenance_mode": 0,
        "workers": { "long": {} },
    });
    fs::write(config::config_path(&legacy), raw.to_string()).unwrap();

    let bench = tmp.path().join("new-bench");
    fs::create_dir_all(&bench).unwrap();
    let site = config::setup_config(&bench, &setup_options(tmp.path())).unwrap();
    assert_eq!(site.webserver_port, Some(8011));
    assert_eq!(site.port(PortName::RedisCache), Some(13000));
    assert_eq!(site.port(PortName::RedisSocketio), Some(13000));

    // legacy 벤치 설정은 읽기만 하므로 그대로
    let untouched: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config::config_path(&legacy)).unwrap()).unwrap();
    assert_eq!(untouched, raw);
}

// ═══════════════════════════════════════════════════════
// 테스트 3: setup → Procfile
// ═══════════════════════════════════════════════════════

#[test]
fn test_setup_then_procfile() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("other")).unwrap();
    config::put_config(
        &serde_json::from_value(json!({ "webserver_port": 8000 })).unwrap(),
        &tmp.path().join("other"),
    )
    .unwrap();

    let bench = tmp.path().join("frappe-bench");
    fs::create_dir_all(&bench).unwrap();
    config::setup_config(&bench, &setup_options(tmp.path())).unwrap();
    config::update_config(
        serde_json::from_value(json!({ "workers": { "long": {} } })).unwrap(),
        &bench,
    )
    .unwrap();

    let options = ProcfileOptions {
        skip_watch: true,
        ..Default::default()
    };
    let path = procfile::setup_procfile(&bench, &options, |_| false).unwrap();
    let content = fs::read_to_string(path).unwrap();

    assert!(content.contains("web: bench serve --port 8001\n"));
    assert!(content.contains("worker_long: bench worker --queue long"));
    assert!(!content.contains("watch:"));
}

#[test]
fn test_missing_benches_dir_is_reported() {
    let tmp = TempDir::new().unwrap();
    let bench = tmp.path().join("nowhere").join("frappe-bench");

    let err = PortAllocator::for_bench(&bench, tmp.path())
        .unwrap()
        .allocate()
        .unwrap_err();
    assert_eq!(err.error_code(), "LIST_SIBLINGS");
}
