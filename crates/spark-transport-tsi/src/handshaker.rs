use std::{any::Any, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    context::{EngineContext, Role},
    engine::HandshakeState,
    error::{TsiError, TsiResult, handshake_failure},
    peer::{self, ALPN_SELECTED_PROTOCOL_PROPERTY, PeerIdentity, PeerProperty},
    protector::FrameProtector,
};

/// 握手器对其工厂的共享引用，保证工厂状态活得比每个握手器都久。
pub type FactoryRef = Arc<dyn Any + Send + Sync>;

/// 握手结果。`Ok` 与 `ProtocolFailure` 都是终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeResult {
    InProgress,
    Ok,
    ProtocolFailure,
}

/// [`Handshaker::get_bytes_to_send_to_peer`] 的产出。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutboundChunk {
    /// 本次写入输出区的字节数。
    pub written: usize,
    /// 仍有待发字节（`IncompleteData`），调用方应再次调用。
    pub more_pending: bool,
}

/// 驱动 TLS 握手的同步状态机。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让调用方以“喂入对端字节 / 取走待发字节 / 查询结果”三个动作驱动握手，不依赖任何运行时；
/// - 握手成功后把 [`EngineContext`] 原样移交给 [`FrameProtector`]，会话密钥不复制、不重建。
///
/// ## 逻辑（How）
/// - 每次 `process_bytes_from_peer` 以入参作为入站视图推进引擎，直到完成、缺输入或输出满；
/// - 引擎报告致命错误时锁存 `ProtocolFailure`，之后不再推进引擎；除了交出尚未取走的告警记录，
///   每次调用都返回同一错误；
/// - [`result`](Self::result) 在引擎已完成而状态尚未更新时惰性升级为 `Ok`。
///
/// ## 契约（What）
/// - 客户端在创建时即推进一步，ClientHello 随即可通过 `get_bytes_to_send_to_peer` 取走；
/// - 进入 `Ok` 后 `process_bytes_from_peer` 不做引擎工作并返回 0，剩余字节应交给保护器的
///   `unprotect`；
/// - `extract_peer` 与 `create_frame_protector` 只在 `Ok` 时可用，上下文移交后除释放外的操作都返回
///   `FailedPrecondition`。
///
/// ## 风险与权衡（Trade-offs）
/// - 输出满时（`WantWrite`）只是暂停：调用方取走密文后，再以未消费的输入继续；
/// - 失败从不在内部重试，是否重连由上层决定。
pub struct Handshaker {
    context: Option<EngineContext>,
    role: Role,
    result: HandshakeResult,
    failure: Option<TsiError>,
    _factory: Option<FactoryRef>,
}

impl Handshaker {
    /// 绑定上下文并（客户端）立即推进首个握手步骤。
    ///
    /// 客户端首步失败时上下文随之释放，不会产出握手器。
    pub fn create(context: EngineContext, factory: Option<FactoryRef>) -> TsiResult<Self> {
        let role = context.role();
        let mut handshaker = Self {
            context: Some(context),
            role,
            result: HandshakeResult::InProgress,
            failure: None,
            _factory: factory,
        };
        if role == Role::Client {
            handshaker.step(&[])?;
        }
        debug!(?role, "tsi handshaker created");
        Ok(handshaker)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 当前结果；引擎已完成时惰性升级为 `Ok`。
    pub fn result(&mut self) -> HandshakeResult {
        if self.result == HandshakeResult::InProgress
            && let Some(context) = &self.context
            && context.engine().is_handshake_complete()
        {
            self.mark_ok();
        }
        self.result
    }

    pub fn is_in_progress(&mut self) -> bool {
        self.result() == HandshakeResult::InProgress
    }

    /// 把待发密文拷进 `out`。
    ///
    /// 握手失败后仍会先交出引擎写下的告警记录，排空之后才返回锁存的错误。
    pub fn get_bytes_to_send_to_peer(&mut self, out: &mut [u8]) -> TsiResult<OutboundChunk> {
        if let Some(failure) = &self.failure {
            return match self.context.as_mut() {
                Some(context) if !out.is_empty() && context.has_pending_output() => {
                    let written = context.drain_outbound(out).map_err(|_| failure.clone())?;
                    Ok(OutboundChunk {
                        written,
                        more_pending: context.has_pending_output(),
                    })
                }
                _ => Err(failure.clone()),
            };
        }
        if out.is_empty() {
            return Err(TsiError::invalid_argument(
                "output buffer for handshake bytes is empty",
            ));
        }
        let context = self.context.as_mut().ok_or_else(transferred)?;
        match context.drain_outbound(out) {
            Ok(written) => Ok(OutboundChunk {
                written,
                more_pending: context.has_pending_output(),
            }),
            Err(error) => Err(self.latch(handshake_failure(error))),
        }
    }

    /// 喂入对端字节，返回实际消费的字节数（可能小于入参长度）。
    pub fn process_bytes_from_peer(&mut self, bytes: &[u8]) -> TsiResult<usize> {
        self.check_failure()?;
        if self.context.is_none() {
            return Err(transferred());
        }
        if self.result() == HandshakeResult::Ok {
            return Ok(0);
        }
        self.step(bytes)
    }

    /// 提取对端身份：证书属性（若对端出示了证书）加可选的 ALPN 属性。
    pub fn extract_peer(&mut self) -> TsiResult<PeerIdentity> {
        self.check_failure()?;
        self.require_ok("extract peer")?;
        let engine = self.context.as_ref().ok_or_else(transferred)?.engine();
        let mut identity = match engine.peer_certificate() {
            Some(der) => peer::extract(&der, true)?,
            None => PeerIdentity::default(),
        };
        if let Some(protocol) = engine.negotiated_alpn() {
            identity.push(PeerProperty::new(ALPN_SELECTED_PROTOCOL_PROPERTY, protocol));
        }
        Ok(identity)
    }

    /// 创建帧保护器并移交引擎上下文。
    ///
    /// `max_frame_size` 被夹在 [`MIN_FRAME_SIZE`](crate::protector::MIN_FRAME_SIZE)
    /// 与 [`MAX_FRAME_SIZE`](crate::protector::MAX_FRAME_SIZE) 之间，缺省取上界。
    pub fn create_frame_protector(
        &mut self,
        max_frame_size: Option<usize>,
    ) -> TsiResult<FrameProtector> {
        self.check_failure()?;
        self.require_ok("create frame protector")?;
        let context = self.context.take().ok_or_else(transferred)?;
        let protector = FrameProtector::new(context, max_frame_size);
        debug!(
            role = ?self.role,
            max_frame_size = protector.max_frame_size(),
            "engine context moved into frame protector"
        );
        Ok(protector)
    }

    fn step(&mut self, inbound: &[u8]) -> TsiResult<usize> {
        let context = self.context.as_mut().ok_or_else(transferred)?;
        let (outcome, consumed) =
            context.drive(inbound, |engine, bio| engine.handshake_step(bio));
        match outcome {
            Ok(HandshakeState::Done) => self.mark_ok(),
            Ok(HandshakeState::WantRead | HandshakeState::WantWrite) => {}
            Err(error) => {
                let error = self.latch(handshake_failure(error));
                // 客户端首步失败：不产出握手器，上下文随 `self` 一起释放。
                return Err(error);
            }
        }
        Ok(consumed)
    }

    fn mark_ok(&mut self) {
        if self.result != HandshakeResult::Ok {
            debug!(role = ?self.role, "tsi handshake completed");
        }
        self.result = HandshakeResult::Ok;
    }

    fn latch(&mut self, error: TsiError) -> TsiError {
        warn!(role = ?self.role, code = error.code(), error = %error, "tsi handshake failed");
        self.result = HandshakeResult::ProtocolFailure;
        self.failure = Some(error.clone());
        error
    }

    fn check_failure(&self) -> TsiResult<()> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn require_ok(&mut self, operation: &'static str) -> TsiResult<()> {
        if self.context.is_none() {
            return Err(transferred());
        }
        if self.result() != HandshakeResult::Ok {
            return Err(TsiError::failed_precondition(format!(
                "cannot {operation} before the handshake completes"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Handshaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshaker")
            .field("role", &self.role)
            .field("result", &self.result)
            .field("holds_context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

fn transferred() -> TsiError {
    TsiError::failed_precondition("engine context was moved into a frame protector")
}
