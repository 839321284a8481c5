//! 客户端与服务端握手器工厂。
//!
//! 工厂在构造时一次性解析全部凭据与策略，构造失败时已建好的部分随之丢弃，
//! 不会留下半成品；之后每个握手器都从工厂持有的共享配置派生出独立的引擎上下文。

mod client;
mod server;

pub use client::ClientHandshakerFactory;
pub use server::ServerHandshakerFactory;

use crate::{context::Role, credentials::AlpnProtocolList, error::TsiResult, handshaker::Handshaker};

/// 握手器工厂的统一能力面。
pub trait HandshakerFactory: Send + Sync {
    fn role(&self) -> Role;

    /// 创建握手器。服务端忽略 `server_name`，证书由对端 SNI 在握手中选择。
    fn create_handshaker(&self, server_name: Option<&str>) -> TsiResult<Handshaker>;
}

fn alpn_from_options(protocols: &[String]) -> TsiResult<AlpnProtocolList> {
    AlpnProtocolList::new(protocols)
}
