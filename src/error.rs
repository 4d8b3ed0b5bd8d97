//! bench-config 에러 타입 — 에러 종류를 구분하여 CLI에서
//! 적절한 메시지와 에러 코드를 출력할 수 있게 합니다.

use std::path::PathBuf;

use crate::ports::PortName;

/// 설정/포트/Procfile 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("Cannot list bench directory '{}'", .path.display())]
    ListSiblings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bench path '{}' has no parent directory", .0.display())]
    NoParentDirectory(PathBuf),

    #[error("No free '{0}' port left above 65535")]
    PortRangeExhausted(PortName),

    #[error("I/O error on '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{}'", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TOML in '{}'", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("'{}' must contain a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("Aborted: '{}' was left unchanged", .0.display())]
    Aborted(PathBuf),
}

impl BenchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ListSiblings { .. } => "LIST_SIBLINGS",
            Self::NoParentDirectory(_) => "NO_PARENT_DIRECTORY",
            Self::PortRangeExhausted(_) => "PORT_RANGE_EXHAUSTED",
            Self::Io { .. } => "IO_ERROR",
            Self::Json { .. } => "INVALID_JSON",
            Self::Toml { .. } => "INVALID_TOML",
            Self::NotAnObject(_) => "NOT_AN_OBJECT",
            Self::Aborted(_) => "ABORTED",
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BenchError::PortRangeExhausted(PortName::Webserver);
        assert_eq!(err.error_code(), "PORT_RANGE_EXHAUSTED");
        assert!(err.to_string().contains("webserver"));

        let err = BenchError::Aborted(PathBuf::from("/tmp/bench/Procfile"));
        assert_eq!(err.error_code(), "ABORTED");
        assert!(err.to_string().contains("Procfile"));
    }

    #[test]
    fn test_list_siblings_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = BenchError::ListSiblings {
            path: PathBuf::from("/nope"),
            source,
        };
        assert_eq!(err.error_code(), "LIST_SIBLINGS");
        assert!(std::error::Error::source(&err).is_some());
    }

    /// CLI는 `{:#}`로 원인 체인까지 출력하므로 원인 메시지는 한 번만 나와야 함
    #[test]
    fn test_source_message_printed_once() {
        let io_err = || std::io::Error::new(std::io::ErrorKind::NotFound, "no such bench dir");
        let errors = vec![
            BenchError::ListSiblings {
                path: PathBuf::from("/nonexist"),
                source: io_err(),
            },
            BenchError::io("/srv/bench/Procfile", io_err()),
        ];
        for err in errors {
            let rendered = format!("{:#}", anyhow::Error::from(err));
            assert_eq!(rendered.matches("no such bench dir").count(), 1, "{}", rendered);
        }

        let json_source = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let json_msg = json_source.to_string();
        let err = BenchError::Json {
            path: PathBuf::from("/srv/bench/sites/common_site_config.json"),
            source: json_source,
        };
        let rendered = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(rendered.matches(json_msg.as_str()).count(), 1, "{}", rendered);

        let toml_source = toml::from_str::<toml::value::Table>("a = = b").unwrap_err();
        let toml_msg = toml_source.to_string();
        let err = BenchError::Toml {
            path: PathBuf::from("/srv/extra.toml"),
            source: toml_source,
        };
        let rendered = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(rendered.matches(toml_msg.as_str()).count(), 1, "{}", rendered);
    }
}
