use std::{borrow::Cow, io};

use rustls::{AlertDescription, Error as RustlsError};
use thiserror::Error;

/// TSI 错误分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为握手器、帧保护器与工厂提供统一的错误语义，调用方据此决定“拆连接 / 修参数 / 忽略”；
/// - 引擎（`rustls`）的错误只在边界处映射一次，内部逻辑不再检查底层错误码。
///
/// ## 契约（What）
/// - `InvalidArgument`：调用方输入非法（PEM 损坏、容量为 0、密码套件列表为空等），不应原样重试；
/// - `InternalError`：资源或引擎配置异常；
/// - `ProtocolFailure`：握手无法完成，锁存后每次调用都会再次返回；
/// - `DataCorrupted`：记录层加解密失败，对当前保护器是致命的；
/// - `Unimplemented`：对端尝试重协商，本实现明确拒绝；
/// - `NotFound`：可选字段缺失（例如证书没有 CN），不影响连接；
/// - `FailedPrecondition`：在错误的握手阶段调用了接口（握手未完成即提取身份、保护器已被取走等）。
///
/// ## 风险与权衡（Trade-offs）
/// - 文案使用 `Cow<'static, str>`，常量路径零分配，动态路径保留底层原因便于排障。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TsiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    #[error("internal error: {0}")]
    InternalError(Cow<'static, str>),
    #[error("handshake failed: {0}")]
    ProtocolFailure(Cow<'static, str>),
    #[error("data corrupted: {0}")]
    DataCorrupted(Cow<'static, str>),
    #[error("unimplemented: {0}")]
    Unimplemented(Cow<'static, str>),
    #[error("not found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("failed precondition: {0}")]
    FailedPrecondition(Cow<'static, str>),
}

/// TSI 操作结果别名。
pub type TsiResult<T> = core::result::Result<T, TsiError>;

impl TsiError {
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn protocol_failure(message: impl Into<Cow<'static, str>>) -> Self {
        Self::ProtocolFailure(message.into())
    }

    pub fn data_corrupted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DataCorrupted(message.into())
    }

    pub fn unimplemented(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unimplemented(message.into())
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    /// 返回稳定错误码，供日志聚合与运维脚本匹配。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "spark.transport.tsi.invalid_argument",
            Self::InternalError(_) => "spark.transport.tsi.internal_error",
            Self::ProtocolFailure(_) => "spark.transport.tsi.protocol_failure",
            Self::DataCorrupted(_) => "spark.transport.tsi.data_corrupted",
            Self::Unimplemented(_) => "spark.transport.tsi.unimplemented",
            Self::NotFound(_) => "spark.transport.tsi.not_found",
            Self::FailedPrecondition(_) => "spark.transport.tsi.failed_precondition",
        }
    }

    /// 返回错误文案（不含分类前缀）。
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(message)
            | Self::InternalError(message)
            | Self::ProtocolFailure(message)
            | Self::DataCorrupted(message)
            | Self::Unimplemented(message)
            | Self::NotFound(message)
            | Self::FailedPrecondition(message) => message,
        }
    }

    /// 调用方遇到该错误后是否必须拆除连接。
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolFailure(_) | Self::DataCorrupted(_) | Self::Unimplemented(_)
        )
    }
}

/// 引擎致命错误的粗粒度归类，仅用于日志字段与排障。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// 证书缺失、不受信任或与名称不符。
    Authentication,
    /// 报文格式、MAC 或握手顺序被破坏。
    Integrity,
    /// 对端能力不兼容、主动告警或关闭。
    Peer,
    /// 本地资源或配置问题（随机数、时间、密钥不一致）。
    Resource,
}

/// TLS 引擎边界上的错误。
///
/// - `WouldBlock`：引擎需要更多 I/O 才能继续（读方向缺数据或写方向要求重新握手）；
/// - `Fatal`：不可恢复的失败，`class` 为粗分类，`reason` 保留底层原因。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine would block")]
    WouldBlock,
    #[error("{class:?} failure: {reason}")]
    Fatal { class: FailureClass, reason: String },
}

impl EngineError {
    pub fn fatal(class: FailureClass, reason: impl Into<String>) -> Self {
        Self::Fatal {
            class,
            reason: reason.into(),
        }
    }
}

impl From<RustlsError> for EngineError {
    fn from(error: RustlsError) -> Self {
        Self::fatal(categorize_rustls_error(&error), error.to_string())
    }
}

impl From<io::Error> for EngineError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::WouldBlock {
            return Self::WouldBlock;
        }
        if let Some(source) = error.get_ref()
            && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
        {
            return Self::fatal(categorize_rustls_error(rustls_error), error.to_string());
        }
        let class = match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => FailureClass::Peer,
            io::ErrorKind::OutOfMemory | io::ErrorKind::WriteZero => FailureClass::Resource,
            _ => FailureClass::Integrity,
        };
        Self::fatal(class, error.to_string())
    }
}

/// 握手阶段：任何致命错误都锁存为 `ProtocolFailure`。
pub(crate) fn handshake_failure(error: EngineError) -> TsiError {
    match error {
        EngineError::WouldBlock => {
            TsiError::protocol_failure("tls engine stalled outside of a read/write wait")
        }
        EngineError::Fatal { reason, .. } => TsiError::protocol_failure(reason),
    }
}

/// 记录层写入：`WouldBlock` 意味着引擎要求重新握手（重协商），明确不支持。
pub(crate) fn record_write_failure(error: EngineError) -> TsiError {
    match error {
        EngineError::WouldBlock => TsiError::unimplemented("renegotiation is not supported"),
        EngineError::Fatal { reason, .. } => TsiError::data_corrupted(reason),
    }
}

/// 记录层读取：只有致命错误会走到这里，`WouldBlock` 由调用方视为“需要更多密文”。
pub(crate) fn record_read_failure(error: EngineError) -> TsiError {
    match error {
        EngineError::WouldBlock => TsiError::data_corrupted("tls record read stalled"),
        EngineError::Fatal { reason, .. } => TsiError::data_corrupted(reason),
    }
}

fn categorize_rustls_error(error: &RustlsError) -> FailureClass {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord => FailureClass::Integrity,
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => FailureClass::Authentication,
        PeerIncompatible(_) | NoApplicationProtocol | HandshakeNotComplete => FailureClass::Peer,
        FailedToGetCurrentTime
        | FailedToGetRandomBytes
        | BadMaxFragmentSize
        | InconsistentKeys(_) => FailureClass::Resource,
        AlertReceived(alert) => alert_to_class(alert),
        _ => FailureClass::Peer,
    }
}

fn alert_to_class(alert: &AlertDescription) -> FailureClass {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateRequired
        | AccessDenied => FailureClass::Authentication,
        DecodeError
        | DecryptError
        | DecryptionFailed
        | IllegalParameter
        | RecordOverflow
        | BadRecordMac
        | UnexpectedMessage => FailureClass::Integrity,
        InternalError => FailureClass::Resource,
        _ => FailureClass::Peer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            TsiError::invalid_argument("x").code(),
            "spark.transport.tsi.invalid_argument"
        );
        assert_eq!(
            TsiError::protocol_failure("x").code(),
            "spark.transport.tsi.protocol_failure"
        );
        assert_eq!(TsiError::not_found("cn").message(), "cn");
    }

    #[test]
    fn only_session_errors_are_connection_fatal() {
        assert!(TsiError::protocol_failure("x").is_connection_fatal());
        assert!(TsiError::data_corrupted("x").is_connection_fatal());
        assert!(TsiError::unimplemented("x").is_connection_fatal());
        assert!(!TsiError::invalid_argument("x").is_connection_fatal());
        assert!(!TsiError::not_found("x").is_connection_fatal());
    }

    #[test]
    fn io_would_block_maps_to_engine_would_block() {
        let error = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(EngineError::from(error), EngineError::WouldBlock);
    }

    #[test]
    fn certificate_errors_are_authentication_failures() {
        let error = EngineError::from(RustlsError::NoCertificatesPresented);
        assert!(matches!(
            error,
            EngineError::Fatal {
                class: FailureClass::Authentication,
                ..
            }
        ));
    }

    #[test]
    fn record_write_would_block_is_renegotiation() {
        assert!(matches!(
            record_write_failure(EngineError::WouldBlock),
            TsiError::Unimplemented(_)
        ));
        assert!(matches!(
            record_write_failure(EngineError::fatal(FailureClass::Integrity, "mac")),
            TsiError::DataCorrupted(_)
        ));
    }
}
