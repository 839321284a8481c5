#![doc = r#"
# spark-transport-tsi

## 设计动机（Why）
- **与传输解耦**：RPC 框架只需在任意字节通道上搬运本 crate 产出的密文，即可获得经过认证的加密链路；
- **同步、非阻塞**：“等待对端数据”“输出区已满”都以显式返回值表达，调用方决定何时重试，不依赖运行时；
- **可审计的身份**：对端证书被拆成具名属性（CN、PEM、SAN、ALPN），主机名校验规则集中实现。

## 核心契约（What）
- [`ClientHandshakerFactory`] / [`ServerHandshakerFactory`]：解析凭据与策略，派生 [`Handshaker`]；
  服务端按 SNI 在多张证书之间分派；
- [`Handshaker`]：`process_bytes_from_peer` / `get_bytes_to_send_to_peer` / `result` 驱动握手，
  完成后 `extract_peer` 提取 [`PeerIdentity`]，`create_frame_protector` 移交引擎上下文；
- [`FrameProtector`]：`protect` / `flush` / `unprotect` 流式加解密，带背压；
- 错误统一为 [`TsiError`]，`ProtocolFailure` / `DataCorrupted` / `Unimplemented` 要求拆除连接。

## 实现策略（How）
- 引擎为 `rustls`（aws-lc-rs 提供者，TLS1.2 + TLS1.3），隐藏在 [`TlsEngine`] 能力面之后；
- [`Bio`] 垫片把本次调用的入站视图与上下文的出站 [`ByteBuffer`] 交给引擎读写；
- [`EngineContext`] 是唯一所有权的值，从握手器移动到保护器，`Drop` 保证只释放一次。

## 风险与考量（Trade-offs）
- 重协商被明确拒绝（`Unimplemented`）；
- 不做证书吊销检查，也不持久化会话票据；
- 未携带 SNI 的客户端只校验证书链，名称校验交由上层通过 [`peer_matches_name`] 完成。
"#]

mod bio;
mod buffer;
mod config;
mod context;
mod credentials;
mod engine;
mod error;
mod factory;
mod handshaker;
pub mod matcher;
pub mod peer;
mod protector;

#[cfg(test)]
mod testing;

pub use bio::{Bio, BioError};
pub use buffer::ByteBuffer;
pub use config::{
    ClientCertificateRequest, ClientFactoryOptions, PemKeyCertPair, ProtectorOptions,
    ServerFactoryOptions,
};
pub use context::{EngineContext, OUTBOUND_CAPACITY, Role};
pub use credentials::{AlpnProtocolList, EngineConfig, parse_cipher_allowlist};
pub use engine::{EngineError, FailureClass, HandshakeState, RustlsEngine, TlsEngine};
pub use error::{TsiError, TsiResult};
pub use factory::{ClientHandshakerFactory, HandshakerFactory, ServerHandshakerFactory};
pub use handshaker::{FactoryRef, HandshakeResult, Handshaker, OutboundChunk};
pub use matcher::{entry_matches_name, looks_like_ip_address, peer_matches_name};
pub use peer::{PeerIdentity, PeerProperty};
pub use protector::{
    FlushProgress, FrameProtector, MAX_FRAME_SIZE, MIN_FRAME_SIZE, PROTECTION_OVERHEAD, Progress,
};
