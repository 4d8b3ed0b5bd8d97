//! Procfile 생성
//!
//! 벤치 설정(`common_site_config.json`)과 skip 플래그를 바탕으로
//! 실행할 프로세스 목록을 `<bench>/Procfile`에 기록합니다.

use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{self, SiteConfig};
use crate::error::{BenchError, Result};

pub const PROCFILE: &str = "Procfile";

const WORKER_LOGS: &str = "1>> logs/worker.log 2>> logs/worker.error.log";
const MAC_WORKER_ENV: &str = "OBJC_DISABLE_INITIALIZE_FORK_SAFETY=YES NO_PROXY=* ";

/// Procfile 생성 옵션
#[derive(Debug, Clone, Default)]
pub struct ProcfileOptions {
    /// 기존 Procfile을 묻지 않고 덮어쓰기
    pub yes: bool,
    pub skip_redis: bool,
    pub skip_web: bool,
    pub skip_watch: bool,
    pub skip_socketio: bool,
    pub skip_schedule: bool,
    /// node 실행 파일 경로. 없으면 `node`
    pub node: Option<PathBuf>,
    pub is_mac: bool,
}

/// `CI` 환경변수가 비어 있지 않을 때만 watch를 기본으로 skip
pub fn ci_skips_watch(ci: Option<&OsStr>) -> bool {
    ci.is_some_and(|value| !value.is_empty())
}

pub fn procfile_path(bench_path: &Path) -> PathBuf {
    bench_path.join(PROCFILE)
}

pub fn render_procfile(config: &SiteConfig, options: &ProcfileOptions) -> String {
    let mut out = String::new();

    if !options.skip_redis {
        out.push_str("redis_cache: redis-server config/redis_cache.conf\n");
        out.push_str("redis_queue: redis-server config/redis_queue.conf\n");
    }

    if !options.skip_web {
        match config.webserver_port {
            Some(port) => {
                let _ = writeln!(out, "web: bench serve --port {}", port);
            }
            None => out.push_str("web: bench serve\n"),
        }
    }

    if !options.skip_socketio {
        let node = options
            .node
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "node".to_string());
        let _ = writeln!(out, "socketio: {} apps/frappe/socketio.js", node);
    }

    if !options.skip_watch {
        out.push_str("watch: bench watch\n");
    }

    if !options.skip_schedule {
        out.push_str("schedule: bench schedule\n");
    }

    let env = if options.is_mac { MAC_WORKER_ENV } else { "" };
    let _ = writeln!(out, "worker: {}bench worker {}", env, WORKER_LOGS);
    for queue in config.workers() {
        let _ = writeln!(
            out,
            "worker_{queue}: {env}bench worker --queue {queue} {WORKER_LOGS}"
        );
    }

    out
}

/// Procfile을 기록합니다.
///
/// 파일이 이미 있고 `options.yes`가 아니면 `confirm`에 덮어쓸지 묻고,
/// 거절하면 [`BenchError::Aborted`]를 반환합니다.
pub fn setup_procfile<F>(bench_path: &Path, options: &ProcfileOptions, confirm: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> bool,
{
    let config = config::get_config(bench_path)?;
    let path = procfile_path(bench_path);

    if !options.yes && path.exists() && !confirm(&path) {
        tracing::warn!("Keeping existing {}", path.display());
        return Err(BenchError::Aborted(path));
    }

    let procfile = render_procfile(&config, options);
    fs::write(&path, procfile).map_err(|e| BenchError::io(&path, e))?;
    tracing::info!("Wrote {}", path.display());
    Ok(path)
}
