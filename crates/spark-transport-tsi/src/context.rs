use std::{fmt, sync::Arc};

use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::ServerName;
use serde::{Deserialize, Serialize};

use crate::{
    bio::Bio,
    buffer::ByteBuffer,
    engine::{EngineError, RustlsEngine, TlsEngine},
    error::{TsiError, TsiResult},
};

/// TLS 单条记录的最大密文长度：5 字节头 + 16 KiB 明文 + 256 字节扩展。
pub const OUTBOUND_CAPACITY: usize = 5 + 16 * 1024 + 256;

/// 握手角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Client,
    Server,
}

/// 一条逻辑连接上的 TLS 会话及其出站暂存区。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“引擎 + 出站缓冲”打包成唯一所有权的值：握手期间由 [`Handshaker`](crate::Handshaker)
///   持有，握手成功后整体移动进 [`FrameProtector`](crate::FrameProtector)；
/// - 释放依赖 `Drop`，因此无论走到哪条失败路径，会话密钥材料都恰好释放一次。
///
/// ## 逻辑（How）
/// - [`drive`](Self::drive) 以本次入站视图与出站缓冲临时拼出 [`Bio`]，把它借给引擎操作；
/// - [`drain_outbound`](Self::drain_outbound) 在拷贝前后都从引擎队列补齐出站缓冲，
///   保证大于缓冲容量的握手飞行也能分批取走。
///
/// ## 契约（What）
/// - 出站缓冲容量为 [`OUTBOUND_CAPACITY`]；
/// - 随机数由引擎的加密提供者负责，无需显式播种；
/// - 不可克隆，跨线程移动安全，但任何操作都需要 `&mut`。
pub struct EngineContext {
    role: Role,
    engine: Box<dyn TlsEngine>,
    outbound: ByteBuffer,
}

impl EngineContext {
    /// 基于共享客户端配置创建会话。
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> TsiResult<Self> {
        let engine = RustlsEngine::client(config, server_name).map_err(engine_setup_failure)?;
        Ok(Self::with_engine(Role::Client, Box::new(engine)))
    }

    /// 基于共享服务端配置创建会话。
    pub fn server(config: Arc<ServerConfig>) -> TsiResult<Self> {
        let engine = RustlsEngine::server(config).map_err(engine_setup_failure)?;
        Ok(Self::with_engine(Role::Server, Box::new(engine)))
    }

    /// 以任意引擎实现构造上下文（测试注入替身时使用）。
    pub fn with_engine(role: Role, engine: Box<dyn TlsEngine>) -> Self {
        Self {
            role,
            engine,
            outbound: ByteBuffer::with_capacity(OUTBOUND_CAPACITY),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 在 `inbound` 视图上执行一次引擎操作，返回操作结果与引擎拉走的入站字节数。
    pub(crate) fn drive<T>(
        &mut self,
        inbound: &[u8],
        operation: impl FnOnce(&mut dyn TlsEngine, &mut Bio<'_>) -> T,
    ) -> (T, usize) {
        let mut bio = Bio::new(inbound, &mut self.outbound);
        let outcome = operation(self.engine.as_mut(), &mut bio);
        (outcome, bio.consumed())
    }

    /// 把暂存的密文拷进 `out`，返回写入的字节数。
    pub fn drain_outbound(&mut self, out: &mut [u8]) -> Result<usize, EngineError> {
        self.top_up()?;
        let written = self.outbound.read_into(out);
        self.top_up()?;
        Ok(written)
    }

    /// 出站缓冲或引擎队列中是否还有待发密文。
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty() || self.engine.has_pending_output()
    }

    pub(crate) fn engine(&self) -> &dyn TlsEngine {
        self.engine.as_ref()
    }

    fn top_up(&mut self) -> Result<usize, EngineError> {
        if !self.engine.has_pending_output() {
            return Ok(0);
        }
        let (pushed, _) = self.drive(&[], |engine, bio| engine.write_pending(bio));
        pushed
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("role", &self.role)
            .field("outbound_unread", &self.outbound.unread())
            .finish_non_exhaustive()
    }
}

fn engine_setup_failure(error: EngineError) -> TsiError {
    TsiError::internal(format!("failed to create tls session: {error}"))
}
