use std::borrow::Cow;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rustls_pki_types::{CertificateDer, pem::PemObject};
use x509_parser::{extensions::GeneralName, parse_x509_certificate};

use crate::error::{TsiError, TsiResult};

/// 证书类型标记属性名。
pub const CERTIFICATE_TYPE_PROPERTY: &str = "certificate-type";
/// [`CERTIFICATE_TYPE_PROPERTY`] 的取值。
pub const X509_CERTIFICATE_TYPE: &str = "X509";
pub const SUBJECT_COMMON_NAME_PROPERTY: &str = "x509-subject-common-name";
pub const PEM_CERT_PROPERTY: &str = "x509-pem-cert";
pub const SUBJECT_ALTERNATIVE_NAME_PROPERTY: &str = "x509-subject-alternative-name";
pub const ALPN_SELECTED_PROTOCOL_PROPERTY: &str = "ssl-alpn-selected-protocol";

const PEM_LINE_WIDTH: usize = 64;

/// 具名的对端属性，取值为原始字节。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerProperty {
    name: Cow<'static, str>,
    value: Vec<u8>,
}

impl PeerProperty {
    pub fn new(name: impl Into<Cow<'static, str>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// 取值为合法 UTF-8 时返回字符串视图。
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// 对端身份：有序的属性序列。
///
/// 属性顺序固定为：可选的证书类型、CN、PEM、按证书顺序排列的 DNS SAN，
/// 握手器在协商出 ALPN 时再追加一项。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    properties: Vec<PeerProperty>,
}

impl PeerIdentity {
    pub fn properties(&self) -> &[PeerProperty] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// 第一个名为 `name` 的属性。
    pub fn property(&self, name: &str) -> Option<&PeerProperty> {
        self.properties.iter().find(|property| property.name() == name)
    }

    pub fn properties_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PeerProperty> + 'a {
        self.properties
            .iter()
            .filter(move |property| property.name() == name)
    }

    pub fn push(&mut self, property: PeerProperty) {
        self.properties.push(property);
    }

    /// 按主机名规则判断本身份是否覆盖 `name`。
    pub fn matches_name(&self, name: &str) -> bool {
        crate::matcher::peer_matches_name(self, name)
    }
}

/// 从 DER 编码的证书构建对端身份。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 1. 解析证书并统计 DNS 类型的 SAN（其它类型跳过）；
/// 2. 按 `(类型标记?1:0) + 2 + SAN 数` 预留属性槽；
/// 3. 依次写入类型标记、CN、PEM 与各 SAN。
///
/// ## 契约（What）
/// - 证书没有 CN 时写入空值，而不是报错；
/// - 任一步失败都直接返回错误，局部构建的属性随之丢弃，调用方不会看到半成品。
pub fn extract(certificate_der: &[u8], include_certificate_type: bool) -> TsiResult<PeerIdentity> {
    let (_, certificate) = parse_x509_certificate(certificate_der)
        .map_err(|error| TsiError::invalid_argument(format!("malformed x509 certificate: {error}")))?;

    let dns_names: Vec<&str> = match certificate.subject_alternative_name() {
        Ok(Some(extension)) => extension
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(*dns),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(error) => {
            return Err(TsiError::invalid_argument(format!(
                "malformed subject alternative name extension: {error}"
            )));
        }
    };

    let mut properties =
        Vec::with_capacity(usize::from(include_certificate_type) + 2 + dns_names.len());
    if include_certificate_type {
        properties.push(PeerProperty::new(
            CERTIFICATE_TYPE_PROPERTY,
            X509_CERTIFICATE_TYPE,
        ));
    }

    let subject = certificate.subject().to_string();
    let common_name = match subject_common_name(&subject) {
        Ok(common_name) => common_name,
        Err(TsiError::NotFound(_)) => "",
        Err(error) => return Err(error),
    };
    properties.push(PeerProperty::new(SUBJECT_COMMON_NAME_PROPERTY, common_name));
    properties.push(PeerProperty::new(
        PEM_CERT_PROPERTY,
        encode_certificate_pem(certificate_der),
    ));
    properties.extend(
        dns_names
            .into_iter()
            .map(|dns| PeerProperty::new(SUBJECT_ALTERNATIVE_NAME_PROPERTY, dns)),
    );

    Ok(PeerIdentity { properties })
}

/// 解析 PEM 证书链中的第一张证书并构建身份（不含类型标记）。
pub fn extract_from_pem(pem: &[u8]) -> TsiResult<PeerIdentity> {
    let leaf = CertificateDer::pem_slice_iter(pem)
        .next()
        .ok_or_else(|| TsiError::invalid_argument("no certificate found in pem input"))?
        .map_err(|error| TsiError::invalid_argument(format!("malformed pem certificate: {error}")))?;
    extract(leaf.as_ref(), false)
}

/// 在单行 Subject DN 中定位 `CN=`，取到下一个 `,` 或行尾。
fn subject_common_name(subject: &str) -> TsiResult<&str> {
    let start = subject
        .find("CN=")
        .ok_or_else(|| TsiError::not_found("subject has no common name"))?
        + "CN=".len();
    let rest = &subject[start..];
    Ok(rest.find(',').map_or(rest, |end| &rest[..end]))
}

/// 将 DER 证书重新编码为 PEM 文本（64 列换行）。
pub fn encode_certificate_pem(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
