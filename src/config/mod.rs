//! common_site_config.json 관리
//!
//! 벤치마다 `sites/common_site_config.json` 하나를 가집니다.
//! 포트 관련 여섯 개 키는 타입이 있는 필드로, 나머지 키는 그대로 보존합니다.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{BenchError, Result};
use crate::ports::{self, PortAllocator, PortAssignment, PortName};

pub const SITES_DIR: &str = "sites";
pub const CONFIG_FILE: &str = "common_site_config.json";

/// gunicorn 워커가 재시작 전에 처리할 기본 요청 수
pub const DEFAULT_MAX_REQUESTS: u32 = 5000;

/// 벤치 설정 레코드
///
/// 인식된 키라도 값의 형태가 맞지 않으면 (예: 문자열 포트) `extra`에 그대로 남아
/// 저장 시 원래 값으로 다시 기록됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct SiteConfig {
    pub webserver_port: Option<u16>,
    pub socketio_port: Option<u16>,
    pub file_watcher_port: Option<u16>,
    pub redis_cache: Option<String>,
    pub redis_queue: Option<String>,
    pub redis_socketio: Option<String>,
    extra: Map<String, Value>,
}

impl SiteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let typed = match key {
            "webserver_port" => self.webserver_port.map(Value::from),
            "socketio_port" => self.socketio_port.map(Value::from),
            "file_watcher_port" => self.file_watcher_port.map(Value::from),
            "redis_cache" => self.redis_cache.clone().map(Value::from),
            "redis_queue" => self.redis_queue.clone().map(Value::from),
            "redis_socketio" => self.redis_socketio.clone().map(Value::from),
            _ => None,
        };
        typed.or_else(|| self.extra.get(key).cloned())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 값을 설정합니다. 포트 키는 형태가 맞으면 타입 필드로 들어갑니다.
    pub fn set(&mut self, key: &str, value: Value) {
        self.extra.remove(key);

        let port = value_as_port(&value);
        let url = value.as_str().map(str::to_string);
        let typed = match key {
            "webserver_port" => {
                self.webserver_port = port;
                port.is_some()
            }
            "socketio_port" => {
                self.socketio_port = port;
                port.is_some()
            }
            "file_watcher_port" => {
                self.file_watcher_port = port;
                port.is_some()
            }
            "redis_cache" => {
                self.redis_cache = url;
                self.redis_cache.is_some()
            }
            "redis_queue" => {
                self.redis_queue = url;
                self.redis_queue.is_some()
            }
            "redis_socketio" => {
                self.redis_socketio = url;
                self.redis_socketio.is_some()
            }
            _ => false,
        };

        if !typed {
            self.extra.insert(key.to_string(), value);
        }
    }

    /// 얕은 병합 — `other`의 값이 우선합니다.
    pub fn merge(&mut self, other: SiteConfig) {
        for (key, value) in Map::from(other) {
            self.set(&key, value);
        }
    }

    pub fn len(&self) -> usize {
        Map::from(self.clone()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 논리 포트 값. redis 키는 URL에서 포트를 추출합니다.
    pub fn port(&self, name: PortName) -> Option<u16> {
        match name {
            PortName::Webserver => self.webserver_port,
            PortName::Socketio => self.socketio_port,
            PortName::FileWatcher => self.file_watcher_port,
            PortName::RedisCache => self.redis_cache.as_deref().and_then(ports::redis_port),
            PortName::RedisQueue => self.redis_queue.as_deref().and_then(ports::redis_port),
            PortName::RedisSocketio => {
                self.redis_socketio.as_deref().and_then(ports::redis_port)
            }
        }
    }

    /// `workers` 객체에 정의된 추가 워커 큐 이름 (정렬됨)
    pub fn workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .extra
            .get("workers")
            .and_then(Value::as_object)
            .map(|workers| workers.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl From<Map<String, Value>> for SiteConfig {
    fn from(map: Map<String, Value>) -> Self {
        let mut config = SiteConfig::default();
        for (key, value) in map {
            config.set(&key, value);
        }
        config
    }
}

impl From<SiteConfig> for Map<String, Value> {
    fn from(config: SiteConfig) -> Self {
        let mut map = config.extra;
        let typed = [
            ("webserver_port", config.webserver_port.map(Value::from)),
            ("socketio_port", config.socketio_port.map(Value::from)),
            ("file_watcher_port", config.file_watcher_port.map(Value::from)),
            ("redis_cache", config.redis_cache.map(Value::from)),
            ("redis_queue", config.redis_queue.map(Value::from)),
            ("redis_socketio", config.redis_socketio.map(Value::from)),
        ];
        for (key, value) in typed {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
        map
    }
}

/// 1..=65535 범위의 정수만 포트로 인정
fn value_as_port(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .filter(|port| *port != 0)
}

pub fn config_path(bench_path: &Path) -> PathBuf {
    bench_path.join(SITES_DIR).join(CONFIG_FILE)
}

/// 벤치 설정 로드 (파일이 없으면 빈 설정)
pub fn get_config(bench_path: &Path) -> Result<SiteConfig> {
    let path = config_path(bench_path);
    if !path.exists() {
        return Ok(SiteConfig::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| BenchError::io(&path, e))?;
    let config = parse_object(&path, &content)?;
    tracing::debug!("Loaded {} keys from {}", config.len(), path.display());
    Ok(config)
}

/// 형제 벤치용 관대한 로드 — 읽기/파싱 실패 시 `None`
pub fn try_get_config(bench_path: &Path) -> Option<SiteConfig> {
    match get_config(bench_path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::debug!("Ignoring unreadable bench config: {}", e);
            None
        }
    }
}

fn parse_object(path: &Path, content: &str) -> Result<SiteConfig> {
    let value: Value = serde_json::from_str(content).map_err(|source| BenchError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(SiteConfig::from(map)),
        _ => Err(BenchError::NotAnObject(path.to_path_buf())),
    }
}

/// 추가 설정 파일 로드 — 확장자가 `.toml`이면 TOML, 그 외에는 JSON
pub fn load_overrides(path: &Path) -> Result<SiteConfig> {
    let content = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if !is_toml {
        return parse_object(path, &content);
    }

    let table: toml::value::Table = toml::from_str(&content).map_err(|source| BenchError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::to_value(table).map_err(|source| BenchError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(SiteConfig::from(map)),
        _ => Err(BenchError::NotAnObject(path.to_path_buf())),
    }
}

/// 설정 저장 — 키 정렬, 한 칸 들여쓰기
pub fn put_config(config: &SiteConfig, bench_path: &Path) -> Result<()> {
    let path = config_path(bench_path);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| BenchError::io(dir, e))?;
    }

    let map = Map::from(config.clone());
    let count = map.len();
    let content = to_json_string(&Value::Object(map)).map_err(|source| BenchError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, content).map_err(|e| BenchError::io(&path, e))?;
    tracing::info!("Saved {} keys to {}", count, path.display());
    Ok(())
}

fn to_json_string(value: &Value) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// 기존 설정에 `new_config`를 덮어쓰고 저장합니다.
pub fn update_config(new_config: SiteConfig, bench_path: &Path) -> Result<SiteConfig> {
    let mut config = get_config(bench_path)?;
    config.merge(new_config);
    put_config(&config, bench_path)?;
    Ok(config)
}

/// setup 시 항상 덮어쓰는 기본 설정
pub fn default_config(frappe_user: &str) -> SiteConfig {
    let defaults = json!({
        "restart_supervisor_on_update": false,
        "restart_systemd_on_update": false,
        "serve_default_site": true,
        "rebase_on_pull": false,
        "frappe_user": frappe_user,
        "shallow_clone": true,
        "background_workers": 1,
        "use_redis_auth": false,
        "live_reload": true,
    });
    match defaults {
        Value::Object(map) => SiteConfig::from(map),
        _ => SiteConfig::default(),
    }
}

/// CPU 수 기준 최대 gunicorn 워커 수
pub fn gunicorn_workers(cpu_count: u32) -> u32 {
    cpu_count.saturating_mul(2).saturating_add(1)
}

pub fn max_requests_jitter(max_requests: u32) -> u32 {
    max_requests / 10
}

/// 워커가 하나뿐이면 무작위 재시작이 응답 지연을 만들기 때문에 0 (비활성)
pub fn default_max_requests(worker_count: u32) -> u32 {
    if worker_count <= 1 {
        0
    } else {
        DEFAULT_MAX_REQUESTS
    }
}

pub fn pids_path(bench_path: &Path) -> PathBuf {
    bench_path.join("config").join("pids")
}

pub fn make_pid_folder(bench_path: &Path) -> Result<()> {
    let path = pids_path(bench_path);
    if !path.exists() {
        fs::create_dir_all(&path).map_err(|e| BenchError::io(&path, e))?;
        tracing::debug!("Created pid folder {}", path.display());
    }
    Ok(())
}

/// 설정에 없는 포트 키만 채웁니다. 이미 있는 값은 건드리지 않습니다.
pub fn apply_ports(config: &mut SiteConfig, ports: &PortAssignment) {
    for (name, _) in ports.iter() {
        let key = name.config_key();
        if !config.contains_key(key) {
            config.set(key, ports.config_value(name));
        }
    }
}

/// setup 단계에 필요한 값들. 프로세스 전역 상태 대신 호출자가 채웁니다.
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// 상대 벤치 경로의 기준 디렉토리
    pub base_dir: PathBuf,
    pub frappe_user: String,
    pub cpu_count: u32,
    /// 마지막에 병합되는 추가 설정
    pub additional: Option<SiteConfig>,
}

/// 벤치 설정 초기화
///
/// pid 폴더 생성 → 기존 설정 로드 → 기본값 덮어쓰기 → gunicorn 워커 수 →
/// 비어 있는 포트 채우기 → 추가 설정 병합 → 저장
pub fn setup_config(bench_path: &Path, options: &SetupOptions) -> Result<SiteConfig> {
    let bench = ports::resolve_bench_path(bench_path, &options.base_dir);
    make_pid_folder(&bench)?;

    let mut config = get_config(&bench)?;
    config.merge(default_config(&options.frappe_user));
    config.set(
        "gunicorn_workers",
        Value::from(gunicorn_workers(options.cpu_count)),
    );

    let ports = PortAllocator::for_bench(&bench, &options.base_dir)?.allocate()?;
    apply_ports(&mut config, &ports);

    if let Some(additional) = &options.additional {
        config.merge(additional.clone());
    }

    put_config(&config, &bench)?;
    tracing::info!("Configured bench at {}", bench.display());
    Ok(config)
}
