use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::bio::Bio;
pub use crate::error::{EngineError, FailureClass};

/// 单次握手推进的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// 握手完成且引擎内没有排队的输出。
    Done,
    /// 需要更多对端字节才能继续，不是错误。
    WantRead,
    /// 出站缓冲已满，调用方取走密文后再以未消费的输入继续。
    WantWrite,
}

/// TSI 所消费的 TLS 引擎能力面。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手器与帧保护器只依赖这组能力，不直接接触 `rustls` 的连接对象；
/// - 测试可以注入脚本化的引擎替身，覆盖真实引擎难以构造的路径（重协商、记录层损坏等）。
///
/// ## 契约（What）
/// - 所有 I/O 都经由调用方传入的 [`Bio`]，引擎不得持有它；
/// - `record_read` 返回 `Ok(0)` 表示本次调用已无更多明文（含对端 `close_notify`）；
/// - `EngineError::WouldBlock` 在读方向表示缺密文，在 `record_write` 上表示引擎要求重新握手。
pub trait TlsEngine: Send {
    /// 推进握手，直到完成、缺输入、输出满或失败。
    fn handshake_step(&mut self, bio: &mut Bio<'_>) -> Result<HandshakeState, EngineError>;

    fn is_handshake_complete(&self) -> bool;

    /// 将引擎内部排队的密文尽量推入出站缓冲，返回推入的字节数。
    fn write_pending(&mut self, bio: &mut Bio<'_>) -> Result<usize, EngineError>;

    /// 引擎内部是否仍有尚未推入出站缓冲的密文。
    fn has_pending_output(&self) -> bool;

    /// 加密 `plaintext` 并把生成的记录推入出站缓冲，返回接受的明文字节数。
    fn record_write(&mut self, plaintext: &[u8], bio: &mut Bio<'_>) -> Result<usize, EngineError>;

    /// 从入站视图解密记录并写入 `out`，返回产出的明文字节数。
    fn record_read(&mut self, out: &mut [u8], bio: &mut Bio<'_>) -> Result<usize, EngineError>;

    /// 对端叶子证书（DER）。
    fn peer_certificate(&self) -> Option<Vec<u8>>;

    /// 协商出的 ALPN 协议。
    fn negotiated_alpn(&self) -> Option<Vec<u8>>;
}

/// 基于 `rustls` 的引擎实现。
pub struct RustlsEngine {
    connection: Connection,
}

impl RustlsEngine {
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, EngineError> {
        let connection = ClientConnection::new(config, server_name)?;
        Ok(Self::from_connection(connection.into()))
    }

    pub fn server(config: Arc<ServerConfig>) -> Result<Self, EngineError> {
        let connection = ServerConnection::new(config)?;
        Ok(Self::from_connection(connection.into()))
    }

    fn from_connection(mut connection: Connection) -> Self {
        // 明文整块交给 `record_write`，由出站缓冲的容量承担背压。
        connection.set_buffer_limit(None);
        Self { connection }
    }

    fn flush(&mut self, bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        let mut total = 0;
        while self.connection.wants_write() {
            match self.connection.write_tls(bio) {
                Ok(0) => break,
                Ok(written) => total += written,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(total)
    }

    /// 拉取一段入站密文并交给引擎处理，失败时尽量把告警写出。
    fn ingest(&mut self, bio: &mut Bio<'_>) -> Result<(), EngineError> {
        match self.connection.read_tls(bio) {
            Ok(0) => {
                return Err(EngineError::fatal(
                    FailureClass::Peer,
                    "transport reached end of stream",
                ));
            }
            Ok(_) => {}
            Err(error) => return Err(error.into()),
        }
        if let Err(error) = self.connection.process_new_packets() {
            let _ = self.flush(bio);
            return Err(error.into());
        }
        Ok(())
    }
}

impl TlsEngine for RustlsEngine {
    fn handshake_step(&mut self, bio: &mut Bio<'_>) -> Result<HandshakeState, EngineError> {
        loop {
            self.flush(bio)?;
            if self.connection.wants_write() {
                return Ok(HandshakeState::WantWrite);
            }
            if !self.connection.is_handshaking() {
                return Ok(HandshakeState::Done);
            }
            match self.ingest(bio) {
                Ok(()) => {}
                Err(EngineError::WouldBlock) => return Ok(HandshakeState::WantRead),
                Err(error) => return Err(error),
            }
        }
    }

    fn is_handshake_complete(&self) -> bool {
        !self.connection.is_handshaking()
    }

    fn write_pending(&mut self, bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        self.flush(bio)
    }

    fn has_pending_output(&self) -> bool {
        self.connection.wants_write()
    }

    fn record_write(&mut self, plaintext: &[u8], bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        let accepted = self.connection.writer().write(plaintext)?;
        self.flush(bio)?;
        Ok(accepted)
    }

    fn record_read(&mut self, out: &mut [u8], bio: &mut Bio<'_>) -> Result<usize, EngineError> {
        loop {
            match self.connection.reader().read(out) {
                Ok(read) => return Ok(read),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => return Err(error.into()),
            }
            self.ingest(bio)?;
            // 告警或密钥更新应答随下一次排空写出。
            self.flush(bio)?;
        }
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.connection
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|leaf| leaf.as_ref().to_vec())
    }

    fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        self.connection.alpn_protocol().map(<[u8]>::to_vec)
    }
}
