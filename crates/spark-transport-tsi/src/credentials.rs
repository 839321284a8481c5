use std::{fmt, sync::Arc};

use rustls::{
    ALL_VERSIONS, RootCertStore, SupportedCipherSuite,
    crypto::{CryptoProvider, aws_lc_rs},
    sign::CertifiedKey,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use tracing::debug;

use crate::{
    context::Role,
    error::{TsiError, TsiResult},
};

/// 单个 ALPN 协议名的最大长度（RFC 7301 以 1 字节表示长度）。
const MAX_ALPN_PROTOCOL_LEN: usize = u8::MAX as usize;

/// 把 OpenSSL 风格的密码套件名映射到引擎套件；表外名称返回 `None`。
fn lookup_cipher_suite(name: &str) -> Option<SupportedCipherSuite> {
    use aws_lc_rs::cipher_suite::*;
    let suite = match name {
        "ECDHE-RSA-AES128-GCM-SHA256" => TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        "ECDHE-RSA-AES256-GCM-SHA384" => TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        "ECDHE-ECDSA-AES128-GCM-SHA256" => TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        "ECDHE-ECDSA-AES256-GCM-SHA384" => TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        "ECDHE-RSA-CHACHA20-POLY1305" => TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        "ECDHE-ECDSA-CHACHA20-POLY1305" => TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        "TLS_AES_128_GCM_SHA256" => TLS13_AES_128_GCM_SHA256,
        "TLS_AES_256_GCM_SHA384" => TLS13_AES_256_GCM_SHA384,
        "TLS_CHACHA20_POLY1305_SHA256" => TLS13_CHACHA20_POLY1305_SHA256,
        _ => return None,
    };
    Some(suite)
}

/// 解析以 `:` 分隔的密码套件名单。
///
/// 未识别的名称被丢弃（记录 `debug` 日志）；空输入、空片段或一个都不识别时返回
/// `InvalidArgument`。
pub fn parse_cipher_allowlist(names: &str) -> TsiResult<Vec<SupportedCipherSuite>> {
    if names.is_empty() {
        return Err(TsiError::invalid_argument("cipher list is empty"));
    }
    let mut suites = Vec::new();
    for name in names.split(':') {
        if name.is_empty() {
            return Err(TsiError::invalid_argument(
                "cipher list contains an empty entry",
            ));
        }
        match lookup_cipher_suite(name) {
            Some(suite) if !suites.contains(&suite) => suites.push(suite),
            Some(_) => {}
            None => debug!(cipher = name, "dropping unsupported cipher suite"),
        }
    }
    if suites.is_empty() {
        return Err(TsiError::invalid_argument(format!(
            "no supported cipher suite in `{names}`"
        )));
    }
    Ok(suites)
}

/// ALPN 协议列表。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlpnProtocolList {
    protocols: Vec<Vec<u8>>,
}

impl AlpnProtocolList {
    /// 校验并收集协议名：每项须非空且不超过 255 字节，整个列表按 RFC 7301
    /// 编码后（每项 1 字节长度前缀）不超过 2 字节长度字段的上限。
    pub fn new<I, P>(protocols: I) -> TsiResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut list = Vec::new();
        let mut encoded_len = 0usize;
        for protocol in protocols {
            let protocol = protocol.as_ref();
            if protocol.is_empty() {
                return Err(TsiError::invalid_argument("alpn protocol name is empty"));
            }
            if protocol.len() > MAX_ALPN_PROTOCOL_LEN {
                return Err(TsiError::invalid_argument(
                    "alpn protocol name is longer than 255 bytes",
                ));
            }
            encoded_len += 1 + protocol.len();
            if encoded_len > usize::from(u16::MAX) {
                return Err(TsiError::invalid_argument("alpn protocol list is too long"));
            }
            list.push(protocol.to_vec());
        }
        Ok(Self { protocols: list })
    }

    pub fn protocols(&self) -> &[Vec<u8>] {
        &self.protocols
    }
}

/// 一个引擎上下文的凭据与策略槽位。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把调用方提供的 PEM 文本一次性解析为 `rustls` 类型，错误在装载时暴露，而不是在首个握手时；
/// - 客户端与服务端工厂共享同一套装载逻辑，角色只影响哪些槽位是必填的。
///
/// ## 契约（What）
/// - 证书链与私钥装载失败都映射为 `InvalidArgument`（均源于调用方提供的 PEM）；
/// - 未设置密码套件名单时使用提供者默认套件；
/// - [`crypto_provider`](Self::crypto_provider) 每次返回按当前策略组装的新提供者。
pub struct EngineConfig {
    role: Role,
    certificate_chain: Vec<CertificateDer<'static>>,
    private_key: Option<PrivateKeyDer<'static>>,
    trusted_ca: Option<RootCertStore>,
    cipher_suites: Option<Vec<SupportedCipherSuite>>,
    alpn: AlpnProtocolList,
}

impl EngineConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            certificate_chain: Vec::new(),
            private_key: None,
            trusted_ca: None,
            cipher_suites: None,
            alpn: AlpnProtocolList::default(),
        }
    }

    pub fn load_certificate_chain(&mut self, pem: &[u8]) -> TsiResult<()> {
        self.certificate_chain = parse_certificates(pem, "certificate chain")?;
        Ok(())
    }

    pub fn load_private_key(&mut self, pem: &[u8]) -> TsiResult<()> {
        let key = PrivateKeyDer::from_pem_slice(pem).map_err(|error| {
            TsiError::invalid_argument(format!("invalid private key pem: {error}"))
        })?;
        self.private_key = Some(key);
        Ok(())
    }

    pub fn load_trusted_ca(&mut self, pem: &[u8]) -> TsiResult<()> {
        let certificates = parse_certificates(pem, "trusted ca bundle")?;
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certificates);
        if added == 0 {
            return Err(TsiError::invalid_argument(
                "trusted ca bundle contains no usable certificate",
            ));
        }
        if ignored > 0 {
            debug!(added, ignored, "ignored unparsable trusted ca certificates");
        }
        self.trusted_ca = Some(store);
        Ok(())
    }

    pub fn set_cipher_allowlist(&mut self, names: &str) -> TsiResult<()> {
        self.cipher_suites = Some(parse_cipher_allowlist(names)?);
        Ok(())
    }

    pub fn set_alpn_protocols(&mut self, protocols: AlpnProtocolList) {
        self.alpn = protocols;
    }

    pub fn alpn_protocols(&self) -> &AlpnProtocolList {
        &self.alpn
    }

    pub fn trusted_ca(&self) -> Option<&RootCertStore> {
        self.trusted_ca.as_ref()
    }

    /// 按当前密码套件策略组装加密提供者。
    pub fn crypto_provider(&self) -> Arc<CryptoProvider> {
        let mut provider = aws_lc_rs::default_provider();
        if let Some(suites) = &self.cipher_suites {
            provider.cipher_suites = suites.clone();
        }
        Arc::new(provider)
    }

    /// 证书链与私钥都已装载时返回二者；只装载其一视为配置错误。
    pub fn identity(
        &self,
    ) -> TsiResult<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
        match (&self.private_key, self.certificate_chain.is_empty()) {
            (Some(key), false) => Ok(Some((self.certificate_chain.clone(), key.clone_key()))),
            (None, true) => Ok(None),
            _ => Err(TsiError::invalid_argument(
                "certificate chain and private key must be provided together",
            )),
        }
    }

    /// 以 `provider` 装载签名密钥，生成服务端使用的 [`CertifiedKey`]。
    pub fn certified_key(&self, provider: &CryptoProvider) -> TsiResult<CertifiedKey> {
        let (chain, key) = self.identity()?.ok_or_else(|| {
            TsiError::invalid_argument("certificate chain and private key are required")
        })?;
        let signing_key = provider.key_provider.load_private_key(key).map_err(|error| {
            TsiError::invalid_argument(format!("unsupported private key: {error}"))
        })?;
        Ok(CertifiedKey::new(chain, signing_key))
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("role", &self.role)
            .field("certificate_chain_len", &self.certificate_chain.len())
            .field("has_private_key", &self.private_key.is_some())
            .field(
                "trusted_ca_len",
                &self.trusted_ca.as_ref().map(RootCertStore::len),
            )
            .field("cipher_suites", &self.cipher_suites)
            .field("alpn", &self.alpn)
            .finish()
    }
}

/// 所有版本的 TLS（1.2 与 1.3）。
pub(crate) fn protocol_versions() -> &'static [&'static rustls::SupportedProtocolVersion] {
    ALL_VERSIONS
}

pub(crate) fn config_failure(error: rustls::Error) -> TsiError {
    TsiError::invalid_argument(format!("incompatible tls policy: {error}"))
}

fn parse_certificates(pem: &[u8], what: &'static str) -> TsiResult<Vec<CertificateDer<'static>>> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| TsiError::invalid_argument(format!("invalid {what} pem: {error}")))?;
    if certificates.is_empty() {
        return Err(TsiError::invalid_argument(format!(
            "{what} contains no certificate"
        )));
    }
    Ok(certificates)
}
