use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{TsiError, TsiResult};

/// PEM 编码的私钥与证书链。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PemKeyCertPair {
    pub private_key: String,
    pub cert_chain: String,
}

impl PemKeyCertPair {
    pub fn new(private_key: impl Into<String>, cert_chain: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            cert_chain: cert_chain.into(),
        }
    }
}

/// 服务端对客户端证书的请求策略。
///
/// `*ButDontVerify` 只要求对端出示证书并校验握手签名，不做链校验；
/// `*AndVerify` 以 `pem_client_root_certs` 做完整链校验。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientCertificateRequest {
    #[default]
    DontRequest,
    RequestButDontVerify,
    RequestAndVerify,
    RequireButDontVerify,
    RequireAndVerify,
}

impl ClientCertificateRequest {
    pub fn is_requested(self) -> bool {
        self != Self::DontRequest
    }

    pub fn is_required(self) -> bool {
        matches!(self, Self::RequireButDontVerify | Self::RequireAndVerify)
    }

    pub fn verifies_chain(self) -> bool {
        matches!(self, Self::RequestAndVerify | Self::RequireAndVerify)
    }
}

/// 客户端工厂的配置面。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientFactoryOptions {
    /// 可选的客户端身份（双向认证时使用）。
    pub pem_key_cert_pair: Option<PemKeyCertPair>,
    /// 用于校验服务端证书链的根证书，必填。
    pub pem_root_certs: String,
    /// `:` 分隔的密码套件名单，缺省使用引擎默认套件。
    pub cipher_suites: Option<String>,
    pub alpn_protocols: Vec<String>,
}

impl ClientFactoryOptions {
    pub fn new(pem_root_certs: impl Into<String>) -> Self {
        Self {
            pem_root_certs: pem_root_certs.into(),
            ..Self::default()
        }
    }

    pub fn with_key_cert_pair(mut self, pair: PemKeyCertPair) -> Self {
        self.pem_key_cert_pair = Some(pair);
        self
    }

    pub fn with_cipher_suites(mut self, cipher_suites: impl Into<String>) -> Self {
        self.cipher_suites = Some(cipher_suites.into());
        self
    }

    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_toml_str(text: &str) -> TsiResult<Self> {
        parse_toml(text, "client factory options")
    }
}

/// 服务端工厂的配置面。
///
/// `pem_key_cert_pairs` 的顺序即 SNI 分派顺序，第一项同时是未携带 SNI 时的缺省证书。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerFactoryOptions {
    pub pem_key_cert_pairs: Vec<PemKeyCertPair>,
    pub pem_client_root_certs: Option<String>,
    pub client_certificate_request: ClientCertificateRequest,
    pub cipher_suites: Option<String>,
    pub alpn_protocols: Vec<String>,
}

impl ServerFactoryOptions {
    pub fn new(pem_key_cert_pairs: Vec<PemKeyCertPair>) -> Self {
        Self {
            pem_key_cert_pairs,
            ..Self::default()
        }
    }

    pub fn with_client_root_certs(mut self, pem: impl Into<String>) -> Self {
        self.pem_client_root_certs = Some(pem.into());
        self
    }

    pub fn with_client_certificate_request(mut self, request: ClientCertificateRequest) -> Self {
        self.client_certificate_request = request;
        self
    }

    /// 兼容旧式布尔开关：`true` 等价于 `RequireAndVerify`，`false` 等价于 `DontRequest`。
    pub fn with_force_client_auth(self, force: bool) -> Self {
        self.with_client_certificate_request(if force {
            ClientCertificateRequest::RequireAndVerify
        } else {
            ClientCertificateRequest::DontRequest
        })
    }

    pub fn with_cipher_suites(mut self, cipher_suites: impl Into<String>) -> Self {
        self.cipher_suites = Some(cipher_suites.into());
        self
    }

    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_toml_str(text: &str) -> TsiResult<Self> {
        parse_toml(text, "server factory options")
    }
}

/// 帧保护器选项。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtectorOptions {
    /// 期望的受保护帧上限，未设置时取上界。
    pub max_frame_size: Option<usize>,
}

impl ProtectorOptions {
    pub fn from_toml_str(text: &str) -> TsiResult<Self> {
        parse_toml(text, "protector options")
    }
}

fn parse_toml<T: DeserializeOwned>(text: &str, what: &'static str) -> TsiResult<T> {
    toml::from_str(text)
        .map_err(|error| TsiError::invalid_argument(format!("invalid {what}: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_flags() {
        use ClientCertificateRequest::*;
        assert!(!DontRequest.is_requested());
        assert!(RequestButDontVerify.is_requested() && !RequestButDontVerify.is_required());
        assert!(RequireButDontVerify.is_required() && !RequireButDontVerify.verifies_chain());
        assert!(RequireAndVerify.verifies_chain());
    }

    #[test]
    fn force_client_auth_maps_to_policy() {
        let options = ServerFactoryOptions::default().with_force_client_auth(true);
        assert_eq!(
            options.client_certificate_request,
            ClientCertificateRequest::RequireAndVerify
        );
        let options = options.with_force_client_auth(false);
        assert_eq!(
            options.client_certificate_request,
            ClientCertificateRequest::DontRequest
        );
    }

    #[test]
    fn unknown_fields_are_invalid_arguments() {
        assert!(matches!(
            ProtectorOptions::from_toml_str("frame = 1"),
            Err(TsiError::InvalidArgument(_))
        ));
        assert_eq!(
            ProtectorOptions::from_toml_str("max_frame_size = 4096").unwrap(),
            ProtectorOptions {
                max_frame_size: Some(4096)
            }
        );
    }
}
