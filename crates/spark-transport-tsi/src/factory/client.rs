use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        verify_server_cert_signed_by_trust_anchor, verify_server_name,
    },
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    server::ParsedCertificate,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::debug;

use super::{HandshakerFactory, alpn_from_options};
use crate::{
    config::ClientFactoryOptions,
    context::{EngineContext, Role},
    credentials::{EngineConfig, config_failure, protocol_versions},
    error::{TsiError, TsiResult},
    handshaker::{FactoryRef, Handshaker},
};

/// 客户端握手器工厂。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 一个工厂服务任意多个并发握手：每次 `create_handshaker` 都从共享配置派生全新的引擎上下文；
/// - 服务端证书链校验永远是强制的，失败即握手失败。
///
/// ## 逻辑（How）
/// - 构造时装载根证书、可选的客户端身份、密码套件策略与 ALPN，生成两份客户端配置：
///   带 SNI 且校验服务端名称的 `named`，以及不发送 SNI、只校验证书链的 `anonymous`；
/// - 握手器持有内部状态的 `Arc`，因此工厂句柄先于握手器释放也是安全的。
///
/// ## 契约（What）
/// - `pem_root_certs` 为空时返回 `InvalidArgument`；
/// - `server_name` 无法解析为 DNS 名或 IP 时返回 `InvalidArgument`。
#[derive(Clone)]
pub struct ClientHandshakerFactory {
    inner: Arc<ClientFactoryInner>,
}

struct ClientFactoryInner {
    named: Arc<ClientConfig>,
    anonymous: Arc<ClientConfig>,
}

impl ClientHandshakerFactory {
    pub fn new(options: &ClientFactoryOptions) -> TsiResult<Self> {
        if options.pem_root_certs.is_empty() {
            return Err(TsiError::invalid_argument(
                "client factory requires trusted root certificates",
            ));
        }
        let mut engine_config = EngineConfig::new(Role::Client);
        if let Some(pair) = &options.pem_key_cert_pair {
            engine_config.load_certificate_chain(pair.cert_chain.as_bytes())?;
            engine_config.load_private_key(pair.private_key.as_bytes())?;
        }
        engine_config.load_trusted_ca(options.pem_root_certs.as_bytes())?;
        if let Some(cipher_suites) = &options.cipher_suites {
            engine_config.set_cipher_allowlist(cipher_suites)?;
        }
        engine_config.set_alpn_protocols(alpn_from_options(&options.alpn_protocols)?);

        let named = build_client_config(&engine_config, true)?;
        let anonymous = build_client_config(&engine_config, false)?;
        debug!(
            mutual_tls = options.pem_key_cert_pair.is_some(),
            alpn = engine_config.alpn_protocols().protocols().len(),
            "tsi client factory created"
        );
        Ok(Self {
            inner: Arc::new(ClientFactoryInner {
                named: Arc::new(named),
                anonymous: Arc::new(anonymous),
            }),
        })
    }

    /// 创建客户端握手器；ClientHello 在返回前已经写入待发缓冲。
    pub fn create_handshaker(&self, server_name: Option<&str>) -> TsiResult<Handshaker> {
        let context = match server_name {
            Some(name) => {
                let server_name = ServerName::try_from(name.to_owned()).map_err(|error| {
                    TsiError::invalid_argument(format!("invalid server name `{name}`: {error}"))
                })?;
                EngineContext::client(Arc::clone(&self.inner.named), server_name)?
            }
            // 未指定 SNI 时以 IP 占位，引擎不会为 IP 发送 SNI，名称也不参与校验。
            None => EngineContext::client(
                Arc::clone(&self.inner.anonymous),
                ServerName::from(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            )?,
        };
        let factory: FactoryRef = self.inner.clone();
        Handshaker::create(context, Some(factory))
    }

    /// 工厂内部状态的共享引用计数（工厂句柄与存活握手器之和）。
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl HandshakerFactory for ClientHandshakerFactory {
    fn role(&self) -> Role {
        Role::Client
    }

    fn create_handshaker(&self, server_name: Option<&str>) -> TsiResult<Handshaker> {
        ClientHandshakerFactory::create_handshaker(self, server_name)
    }
}

impl fmt::Debug for ClientHandshakerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandshakerFactory")
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

fn build_client_config(engine_config: &EngineConfig, check_name: bool) -> TsiResult<ClientConfig> {
    let provider = engine_config.crypto_provider();
    let roots = engine_config
        .trusted_ca()
        .cloned()
        .ok_or_else(|| TsiError::invalid_argument("trusted root certificates are not loaded"))?;
    let verifier = TsiServerVerifier {
        roots,
        provider: Arc::clone(&provider),
        check_name,
    };
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(protocol_versions())
        .map_err(config_failure)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));
    let mut config = match engine_config.identity()? {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(config_failure)?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = engine_config.alpn_protocols().protocols().to_vec();
    config.enable_sni = check_name;
    Ok(config)
}

/// 服务端证书校验器：证书链总是校验，名称只在请求了 SNI 时校验。
#[derive(Debug)]
struct TsiServerVerifier {
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
    check_name: bool,
}

impl ServerCertVerifier for TsiServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let certificate = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &certificate,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        if self.check_name {
            verify_server_name(&certificate, server_name)?;
        }
        Ok(ServerCertVerified::assertion())
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
