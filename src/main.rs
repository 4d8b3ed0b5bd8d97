//! bench-config CLI
//!
//! ## 사용법
//! ```text
//! bench-config setup <bench_path> [--extra <file>]   # common_site_config.json 초기화
//! bench-config procfile <bench_path> [options]       # Procfile 생성
//! bench-config ports <bench_path> [--json]           # 포트 할당 결과만 출력
//! bench-config help
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bench_config::{config, procfile, PortAllocator, ProcfileOptions, SetupOptions};

fn main() {
    // 로그는 stderr로 — `ports --json` 출력을 오염시키지 않음
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args) {
        eprintln!("✗ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Vec<String>) -> anyhow::Result<()> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    if args_ref.is_empty() || matches!(args_ref[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    if matches!(args_ref[0], "--version" | "-V") {
        println!("bench-config {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let command = args_ref[0];
    if !matches!(command, "setup" | "procfile" | "ports") {
        eprintln!("✗ Unknown command: {}", command);
        eprintln!("  Run 'bench-config help' for usage.");
        std::process::exit(1);
    }

    let Some(bench_path) = args_ref.get(1).filter(|a| !a.starts_with("--")) else {
        anyhow::bail!("'{}' needs a <bench_path>. Run 'bench-config help' for usage.", command);
    };
    let bench_path = Path::new(bench_path);
    let flags = &args_ref[2..];

    match command {
        "setup" => cmd_setup(bench_path, flags),
        "procfile" => cmd_procfile(bench_path, flags),
        _ => cmd_ports(bench_path, flags),
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

fn cmd_setup(bench_path: &Path, flags: &[&str]) -> anyhow::Result<()> {
    let additional = match flag_value(flags, "--extra")? {
        Some(path) => Some(config::load_overrides(Path::new(path))?),
        None => None,
    };

    let options = SetupOptions {
        base_dir: std::env::current_dir().context("Cannot read current directory")?,
        frappe_user: current_user(),
        cpu_count: cpu_count(),
        additional,
    };

    let site_config = config::setup_config(bench_path, &options)?;
    let workers = config::gunicorn_workers(options.cpu_count);
    let max_requests = config::default_max_requests(workers);

    println!("✓ Configured {}", config::config_path(bench_path).display());
    println!("  webserver_port:   {}", display_key(&site_config, "webserver_port"));
    println!("  socketio_port:    {}", display_key(&site_config, "socketio_port"));
    println!("  redis_cache:      {}", display_key(&site_config, "redis_cache"));
    println!("  redis_queue:      {}", display_key(&site_config, "redis_queue"));
    println!("  gunicorn_workers: {}", workers);
    println!(
        "  max_requests:     {} (jitter {})",
        max_requests,
        config::max_requests_jitter(max_requests)
    );
    Ok(())
}

fn cmd_procfile(bench_path: &Path, flags: &[&str]) -> anyhow::Result<()> {
    let has = |flag: &str| flags.iter().any(|f| *f == flag);
    let ci = std::env::var_os("CI");
    let options = ProcfileOptions {
        yes: has("--yes") || has("-y"),
        skip_redis: has("--skip-redis"),
        skip_web: has("--skip-web"),
        skip_watch: has("--skip-watch") || procfile::ci_skips_watch(ci.as_deref()),
        skip_socketio: has("--skip-socketio"),
        skip_schedule: has("--skip-schedule"),
        node: find_in_path("node").or_else(|| find_in_path("nodejs")),
        is_mac: cfg!(target_os = "macos"),
    };

    let path = procfile::setup_procfile(bench_path, &options, confirm_overwrite)?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

fn cmd_ports(bench_path: &Path, flags: &[&str]) -> anyhow::Result<()> {
    let base_dir = std::env::current_dir().context("Cannot read current directory")?;
    let ports = PortAllocator::for_bench(bench_path, &base_dir)?.allocate()?;

    if flags.contains(&"--json") {
        println!("{}", serde_json::to_string_pretty(&ports.to_config_map())?);
        return Ok(());
    }

    for (name, port) in ports.iter() {
        match ports.redis_url(name) {
            Some(url) => println!("{}: {}", name.config_key(), url),
            None => println!("{}: {}", name.config_key(), port),
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════
// 헬퍼
// ═══════════════════════════════════════════════════════

fn flag_value<'a>(flags: &[&'a str], name: &str) -> anyhow::Result<Option<&'a str>> {
    match flags.iter().position(|f| *f == name) {
        Some(i) => match flags.get(i + 1) {
            Some(value) => Ok(Some(*value)),
            None => anyhow::bail!("{} needs a value", name),
        },
        None => Ok(None),
    }
}

fn display_key(site_config: &bench_config::SiteConfig, key: &str) -> String {
    site_config
        .get(key)
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| "-".to_string())
}

fn confirm_overwrite(path: &Path) -> bool {
    print!(
        "{} already exists and this will overwrite it. Do you want to continue? [y/N]: ",
        path.display()
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// 로그인 사용자 이름 (LOGNAME → USER → LNAME → USERNAME)
fn current_user() -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "frappe".to_string())
}

fn cpu_count() -> u32 {
    let mut sys = sysinfo::System::new();
    sys.refresh_cpu();
    u32::try_from(sys.cpus().len()).unwrap_or(u32::MAX).max(1)
}

/// PATH에서 실행 파일 탐색
fn find_in_path(name: &str) -> Option<PathBuf> {
    let exe = if cfg!(target_os = "windows") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(&exe))
        .find(|candidate| candidate.is_file())
}

fn print_help() {
    println!("bench-config — bench site config, port and Procfile setup");
    println!();
    println!("USAGE:");
    println!("  bench-config <command> <bench_path> [options]");
    println!();
    println!("COMMANDS:");
    println!("  setup <bench_path>              Write sites/common_site_config.json");
    println!("        --extra <file>            Merge extra config (.json or .toml) last");
    println!("  procfile <bench_path>           Write the Procfile");
    println!("        --yes, -y                 Overwrite without asking");
    println!("        --skip-redis              Leave out redis processes");
    println!("        --skip-web                Leave out the web server");
    println!("        --skip-watch              Leave out the asset watcher (default when CI is non-empty)");
    println!("        --skip-socketio           Leave out socketio");
    println!("        --skip-schedule           Leave out the scheduler");
    println!("  ports <bench_path> [--json]     Print the ports a new bench would get");
    println!("  help                            This help message");
    println!();
    println!("ENVIRONMENT:");
    println!("  RUST_LOG                        Log filter (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("  bench-config setup ./frappe-bench");
    println!("  bench-config procfile ./frappe-bench --yes --skip-watch");
    println!("  bench-config ports ./frappe-bench --json");
}
