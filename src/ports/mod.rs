//! 벤치 포트 할당 모듈
//!
//! 같은 부모 디렉토리 아래의 형제 벤치들의 `common_site_config.json`을 스캔하여
//! 논리 포트(webserver, socketio, file_watcher, redis_*)마다
//! 기존 최대값 + 1을 새 포트로 제안합니다.
//!
//! - 형제 설정 파일이 없거나 깨져 있으면 빈 설정으로 취급합니다.
//! - 부모 디렉토리를 읽을 수 없으면 에러를 그대로 전달합니다.
//! - 포트를 실제로 바인딩하거나 예약하지 않습니다. 동시에 두 벤치를 설정하면
//!   같은 포트가 제안될 수 있습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::{self, SiteConfig};
use crate::error::{BenchError, Result};

/// redis URL을 만들 때 사용하는 호스트
pub const REDIS_HOST: &str = "127.0.0.1";

/// 논리 포트 이름
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortName {
    Webserver,
    Socketio,
    FileWatcher,
    RedisQueue,
    RedisSocketio,
    RedisCache,
}

impl PortName {
    pub const ALL: [PortName; 6] = [
        PortName::Webserver,
        PortName::Socketio,
        PortName::FileWatcher,
        PortName::RedisQueue,
        PortName::RedisSocketio,
        PortName::RedisCache,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webserver => "webserver",
            Self::Socketio => "socketio",
            Self::FileWatcher => "file_watcher",
            Self::RedisQueue => "redis_queue",
            Self::RedisSocketio => "redis_socketio",
            Self::RedisCache => "redis_cache",
        }
    }

    /// common_site_config.json에서 사용하는 키
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Webserver => "webserver_port",
            Self::Socketio => "socketio_port",
            Self::FileWatcher => "file_watcher_port",
            Self::RedisQueue => "redis_queue",
            Self::RedisSocketio => "redis_socketio",
            Self::RedisCache => "redis_cache",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.config_key() == key)
    }

    /// `redis://host:port` 형태로 저장되는 포트인지 여부
    pub fn is_redis(self) -> bool {
        matches!(self, Self::RedisQueue | Self::RedisSocketio | Self::RedisCache)
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 여섯 개 논리 포트 전체에 대한 포트 배정
///
/// `Default`는 형제 벤치가 하나도 없을 때 쓰는 기본 포트 표입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub webserver: u16,
    pub socketio: u16,
    pub file_watcher: u16,
    pub redis_queue: u16,
    pub redis_socketio: u16,
    pub redis_cache: u16,
}

impl Default for PortAssignment {
    fn default() -> Self {
        Self {
            webserver: 8000,
            socketio: 9000,
            file_watcher: 6787,
            redis_queue: 11000,
            redis_socketio: 13000,
            redis_cache: 13000,
        }
    }
}

impl PortAssignment {
    pub fn get(&self, name: PortName) -> u16 {
        match name {
            PortName::Webserver => self.webserver,
            PortName::Socketio => self.socketio,
            PortName::FileWatcher => self.file_watcher,
            PortName::RedisQueue => self.redis_queue,
            PortName::RedisSocketio => self.redis_socketio,
            PortName::RedisCache => self.redis_cache,
        }
    }

    fn set(&mut self, name: PortName, port: u16) {
        match name {
            PortName::Webserver => self.webserver = port,
            PortName::Socketio => self.socketio = port,
            PortName::FileWatcher => self.file_watcher = port,
            PortName::RedisQueue => self.redis_queue = port,
            PortName::RedisSocketio => self.redis_socketio = port,
            PortName::RedisCache => self.redis_cache = port,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PortName, u16)> + '_ {
        PortName::ALL.into_iter().map(move |name| (name, self.get(name)))
    }

    /// redis 포트면 `redis://127.0.0.1:<port>` URL, 아니면 `None`
    pub fn redis_url(&self, name: PortName) -> Option<String> {
        name.is_redis().then(|| redis_url(self.get(name)))
    }

    /// 설정 파일에 기록할 값 (redis는 URL 문자열, 나머지는 정수)
    pub fn config_value(&self, name: PortName) -> Value {
        match self.redis_url(name) {
            Some(url) => Value::String(url),
            None => Value::from(self.get(name)),
        }
    }

    /// 설정 키 → 값 맵 (`ports --json` 출력 형태)
    pub fn to_config_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, _)| (name.config_key().to_string(), self.config_value(name)))
            .collect()
    }
}

pub fn redis_url(port: u16) -> String {
    format!("redis://{}:{}", REDIS_HOST, port)
}

/// redis URL에서 포트만 추출합니다. 파싱 실패나 포트 없음은 `None`.
pub fn redis_port(value: &str) -> Option<u16> {
    let parsed = url::Url::parse(value).ok()?;
    parsed.port().filter(|port| *port != 0)
}

/// 형제 벤치에서 관측된 포트 값들
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedPorts {
    values: BTreeMap<PortName, Vec<u16>>,
}

impl ObservedPorts {
    /// 설정 레코드 하나에서 인식 가능한 포트를 모두 수집
    pub fn record(&mut self, config: &SiteConfig) {
        for name in PortName::ALL {
            if let Some(port) = config.port(name) {
                self.values.entry(name).or_default().push(port);
            }
        }
    }

    pub fn values(&self, name: PortName) -> &[u16] {
        self.values.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn max(&self, name: PortName) -> Option<u16> {
        self.values(name).iter().copied().max()
    }

    /// 관측값이 있으면 최대값 + 1, 없으면 `defaults`의 값을 사용합니다.
    /// redis_socketio는 하위 호환을 위해 항상 redis_cache와 같은 포트입니다.
    pub fn next_assignment(&self, defaults: &PortAssignment) -> Result<PortAssignment> {
        let mut ports = *defaults;
        for name in PortName::ALL {
            // redis_cache에서 복사되므로 계산하지 않음
            if name == PortName::RedisSocketio {
                continue;
            }
            if let Some(max) = self.max(name) {
                let next = max
                    .checked_add(1)
                    .ok_or(BenchError::PortRangeExhausted(name))?;
                ports.set(name, next);
            }
        }
        ports.redis_socketio = ports.redis_cache;
        Ok(ports)
    }
}

/// 형제 벤치 디렉토리를 스캔하여 포트를 배정하는 할당기
#[derive(Debug, Clone)]
pub struct PortAllocator {
    benches_dir: PathBuf,
    defaults: PortAssignment,
}

impl PortAllocator {
    /// 모든 벤치를 담고 있는 부모 디렉토리를 직접 지정
    pub fn new(benches_dir: impl Into<PathBuf>) -> Self {
        Self {
            benches_dir: benches_dir.into(),
            defaults: PortAssignment::default(),
        }
    }

    /// 벤치 경로로부터 부모 디렉토리를 구합니다.
    /// 상대 경로는 `base_dir` 기준으로 해석합니다.
    pub fn for_bench(bench_path: &Path, base_dir: &Path) -> Result<Self> {
        let bench = resolve_bench_path(bench_path, base_dir);
        let parent = bench
            .parent()
            .ok_or_else(|| BenchError::NoParentDirectory(bench.clone()))?;
        Ok(Self::new(parent))
    }

    pub fn with_defaults(mut self, defaults: PortAssignment) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn benches_dir(&self) -> &Path {
        &self.benches_dir
    }

    /// 부모 디렉토리의 모든 하위 디렉토리에서 포트 값을 수집합니다.
    pub fn scan(&self) -> Result<ObservedPorts> {
        let list_err = |source| BenchError::ListSiblings {
            path: self.benches_dir.clone(),
            source,
        };

        let mut observed = ObservedPorts::default();
        let mut scanned = 0usize;
        for entry in fs::read_dir(&self.benches_dir).map_err(list_err)? {
            let path = entry.map_err(list_err)?.path();
            if !path.is_dir() {
                continue;
            }
            scanned += 1;
            match config::try_get_config(&path) {
                Some(site_config) => observed.record(&site_config),
                None => tracing::debug!("Treating {} as a bench without ports", path.display()),
            }
        }

        tracing::debug!(
            "Scanned {} bench directories under {}",
            scanned,
            self.benches_dir.display()
        );
        Ok(observed)
    }

    pub fn allocate(&self) -> Result<PortAssignment> {
        let ports = self.scan()?.next_assignment(&self.defaults)?;
        tracing::info!(
            "Allocated ports: webserver={} socketio={} file_watcher={} redis_queue={} redis_cache={}",
            ports.webserver,
            ports.socketio,
            ports.file_watcher,
            ports.redis_queue,
            ports.redis_cache
        );
        Ok(ports)
    }
}

/// 벤치 경로를 절대 경로로 만들고 `.`/`..`를 정리합니다.
pub fn resolve_bench_path(bench_path: &Path, base_dir: &Path) -> PathBuf {
    let joined = if bench_path.is_absolute() {
        bench_path.to_path_buf()
    } else {
        base_dir.join(bench_path)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}
