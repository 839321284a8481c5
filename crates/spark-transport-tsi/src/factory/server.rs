use std::{fmt, sync::Arc};

use rustls::{
    DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme,
    client::danger::HandshakeSignatureValid,
    crypto::{CryptoProvider, aws_lc_rs, verify_tls12_signature, verify_tls13_signature},
    server::{
        ClientHello, ResolvesServerCert, WebPkiClientVerifier,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
    sign::CertifiedKey,
};
use rustls_pki_types::{CertificateDer, UnixTime};
use tracing::{debug, warn};

use super::{HandshakerFactory, alpn_from_options};
use crate::{
    config::{ClientCertificateRequest, ServerFactoryOptions},
    context::{EngineContext, Role},
    credentials::{EngineConfig, config_failure, protocol_versions},
    error::{TsiError, TsiResult},
    handshaker::{FactoryRef, Handshaker},
    peer::{self, PeerIdentity, SUBJECT_COMMON_NAME_PROPERTY},
};

/// 服务端握手器工厂，支持按 SNI 在多张证书之间分派。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同一监听端口承载多个虚拟主机：客户端在 ClientHello 中携带的 SNI 决定出示哪张证书；
/// - 客户端证书策略集中在工厂层声明，握手器无需感知。
///
/// ## 逻辑（How）
/// 1. 逐个装载 `pem_key_cert_pairs`，为每张证书生成签名密钥并提取其身份（不含类型标记）；
/// 2. 所有条目组成有序的分派表，注册为引擎的证书解析器；
/// 3. 依据 [`ClientCertificateRequest`] 选择客户端证书校验器，共享 ALPN 与密码套件策略；
/// 4. 尽力安装会话票据生成器，失败只记录告警。
///
/// ## 契约（What）
/// - 至少需要一对证书与私钥；任一条目失败则整个工厂构造失败；
/// - 分派规则：未携带 SNI 取第一项；携带 SNI 取第一项身份匹配者；没有匹配则握手失败，
///   不回退到缺省证书；
/// - `*AndVerify` 策略必须提供 `pem_client_root_certs`，否则返回 `InvalidArgument`。
#[derive(Clone)]
pub struct ServerHandshakerFactory {
    inner: Arc<ServerFactoryInner>,
}

struct ServerFactoryInner {
    config: Arc<ServerConfig>,
    resolver: Arc<SniCertificateResolver>,
}

impl ServerHandshakerFactory {
    pub fn new(options: &ServerFactoryOptions) -> TsiResult<Self> {
        if options.pem_key_cert_pairs.is_empty() {
            return Err(TsiError::invalid_argument(
                "server factory requires at least one key/certificate pair",
            ));
        }
        let mut shared = EngineConfig::new(Role::Server);
        if let Some(cipher_suites) = &options.cipher_suites {
            shared.set_cipher_allowlist(cipher_suites)?;
        }
        if let Some(roots) = &options.pem_client_root_certs {
            shared.load_trusted_ca(roots.as_bytes())?;
        }
        shared.set_alpn_protocols(alpn_from_options(&options.alpn_protocols)?);
        let provider = shared.crypto_provider();

        let mut entries = Vec::with_capacity(options.pem_key_cert_pairs.len());
        for pair in &options.pem_key_cert_pairs {
            let mut entry = EngineConfig::new(Role::Server);
            entry.load_certificate_chain(pair.cert_chain.as_bytes())?;
            entry.load_private_key(pair.private_key.as_bytes())?;
            entries.push(SniEntry {
                certified_key: Arc::new(entry.certified_key(&provider)?),
                identity: peer::extract_from_pem(pair.cert_chain.as_bytes())?,
            });
        }
        let resolver = Arc::new(SniCertificateResolver { entries });

        let request = options.client_certificate_request;
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(protocol_versions())
            .map_err(config_failure)?;
        let builder = match client_verifier(request, shared.trusted_ca(), &provider)? {
            Some(verifier) => builder.with_client_cert_verifier(verifier),
            None => builder.with_no_client_auth(),
        };
        let mut config = builder.with_cert_resolver(resolver.clone());
        config.alpn_protocols = shared.alpn_protocols().protocols().to_vec();
        match aws_lc_rs::Ticketer::new() {
            Ok(ticketer) => config.ticketer = ticketer,
            Err(error) => warn!(error = %error, "session tickets disabled: ticketer setup failed"),
        }

        debug!(
            certificates = resolver.entries.len(),
            client_certificate_request = ?request,
            "tsi server factory created"
        );
        Ok(Self {
            inner: Arc::new(ServerFactoryInner {
                config: Arc::new(config),
                resolver,
            }),
        })
    }

    /// 创建服务端握手器；证书在握手过程中按对端 SNI 选定。
    pub fn create_handshaker(&self) -> TsiResult<Handshaker> {
        let context = EngineContext::server(Arc::clone(&self.inner.config))?;
        let factory: FactoryRef = self.inner.clone();
        Handshaker::create(context, Some(factory))
    }

    /// 分派表中各证书的身份，顺序与配置一致。
    pub fn identities(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.inner.resolver.entries.iter().map(|entry| &entry.identity)
    }

    /// 按分派规则为 `server_name` 选出的证书下标。
    pub fn select_certificate(&self, server_name: Option<&str>) -> Option<usize> {
        self.inner.resolver.select(server_name)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl HandshakerFactory for ServerHandshakerFactory {
    fn role(&self) -> Role {
        Role::Server
    }

    fn create_handshaker(&self, _server_name: Option<&str>) -> TsiResult<Handshaker> {
        ServerHandshakerFactory::create_handshaker(self)
    }
}

impl fmt::Debug for ServerHandshakerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandshakerFactory")
            .field("resolver", &self.inner.resolver)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

struct SniEntry {
    certified_key: Arc<CertifiedKey>,
    identity: PeerIdentity,
}

/// 按 SNI 选择证书的解析器。
struct SniCertificateResolver {
    entries: Vec<SniEntry>,
}

impl SniCertificateResolver {
    fn select(&self, server_name: Option<&str>) -> Option<usize> {
        let Some(name) = server_name else {
            return (!self.entries.is_empty()).then_some(0);
        };
        let selected = self
            .entries
            .iter()
            .position(|entry| entry.identity.matches_name(name));
        match selected {
            Some(index) => debug!(server_name = name, index, "sni selected certificate"),
            None => warn!(server_name = name, "no certificate matches the requested sni"),
        }
        selected
    }
}

impl ResolvesServerCert for SniCertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let index = self.select(client_hello.server_name())?;
        self.entries
            .get(index)
            .map(|entry| Arc::clone(&entry.certified_key))
    }
}

impl fmt::Debug for SniCertificateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|entry| entry.identity.property(SUBJECT_COMMON_NAME_PROPERTY))
            .filter_map(|property| property.value_str())
            .collect();
        f.debug_struct("SniCertificateResolver")
            .field("common_names", &names)
            .finish()
    }
}

/// 把客户端证书策略映射为引擎校验器；`None` 表示不请求客户端证书。
fn client_verifier(
    request: ClientCertificateRequest,
    roots: Option<&RootCertStore>,
    provider: &Arc<CryptoProvider>,
) -> TsiResult<Option<Arc<dyn ClientCertVerifier>>> {
    if !request.is_requested() {
        return Ok(None);
    }
    if !request.verifies_chain() {
        return Ok(Some(Arc::new(UnverifiedClientCertificate {
            provider: Arc::clone(provider),
            mandatory: request.is_required(),
        })));
    }
    let roots = roots.ok_or_else(|| {
        TsiError::invalid_argument(format!(
            "client certificate policy {request:?} requires pem_client_root_certs"
        ))
    })?;
    let builder =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots.clone()), Arc::clone(provider));
    let builder = if request.is_required() {
        builder
    } else {
        builder.allow_unauthenticated()
    };
    let verifier = builder.build().map_err(|error| {
        TsiError::invalid_argument(format!("invalid client certificate verifier: {error}"))
    })?;
    Ok(Some(verifier))
}

/// 请求（或要求）客户端证书但不校验证书链；握手签名仍然校验。
#[derive(Debug)]
struct UnverifiedClientCertificate {
    provider: Arc<CryptoProvider>,
    mandatory: bool,
}

impl ClientCertVerifier for UnverifiedClientCertificate {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
