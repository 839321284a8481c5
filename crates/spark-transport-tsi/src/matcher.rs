//! 参考名称与对端身份的匹配规则（精确 / 左侧单级通配 / IP 字面量）。

use crate::peer::{PeerIdentity, SUBJECT_ALTERNATIVE_NAME_PROPERTY, SUBJECT_COMMON_NAME_PROPERTY};

/// 粗略判断 `name` 是否为 IP 字面量：含 `:` 视为 IPv6，否则要求恰好 4 组 1~3 位数字。
pub fn looks_like_ip_address(name: &str) -> bool {
    if name.contains(':') {
        return true;
    }
    let mut groups = 0;
    for group in name.split('.') {
        groups += 1;
        if groups > 4 || group.is_empty() || group.len() > 3 {
            return false;
        }
        if !group.bytes().all(|byte| byte.is_ascii_digit()) {
            return false;
        }
    }
    groups == 4
}

/// 单个证书条目（SAN 或 CN）是否覆盖 `name`。
///
/// - 两侧各去掉一个结尾 `.`，去掉后为空的条目永不匹配；
/// - 先做区分大小写的精确比较；
/// - 否则条目须以 `*.` 开头，且 `name` 第一个 `.` 之后的剩余部分本身还要包含一个
///   非结尾的 `.`，再与条目 `*.` 之后的部分逐字节比较。
pub fn entry_matches_name(entry: &str, name: &str) -> bool {
    let entry = entry.strip_suffix('.').unwrap_or(entry);
    if entry.is_empty() {
        return false;
    }
    let name = name.strip_suffix('.').unwrap_or(name);
    if entry == name {
        return true;
    }
    let Some(wildcard_suffix) = entry.strip_prefix("*.") else {
        return false;
    };
    if entry.len() < 3 {
        return false;
    }
    let Some(dot) = name.find('.') else {
        return false;
    };
    let subdomain = &name[dot..];
    if subdomain.len() < 2 {
        return false;
    }
    // `subdomain` 以 `.` 开头，通配只覆盖一级标签，剩余部分必须至少还有两级。
    let remainder = &subdomain[1..];
    match remainder.find('.') {
        Some(index) if index + 1 < remainder.len() => {}
        _ => return false,
    }
    let remainder = remainder.strip_suffix('.').unwrap_or(remainder);
    wildcard_suffix == remainder
}

/// 判断对端身份是否覆盖参考名称 `name`。
///
/// SAN 优先：只要存在 SAN 属性就不再回退 CN；IP 字面量只接受逐字节相等的 SAN。
pub fn peer_matches_name(identity: &PeerIdentity, name: &str) -> bool {
    let is_ip = looks_like_ip_address(name);
    let mut saw_san = false;
    for san in identity.properties_named(SUBJECT_ALTERNATIVE_NAME_PROPERTY) {
        saw_san = true;
        let matched = if is_ip {
            san.value() == name.as_bytes()
        } else {
            san.value_str()
                .is_some_and(|entry| entry_matches_name(entry, name))
        };
        if matched {
            return true;
        }
    }
    if saw_san || is_ip {
        return false;
    }
    identity
        .property(SUBJECT_COMMON_NAME_PROPERTY)
        .and_then(|property| property.value_str())
        .is_some_and(|common_name| entry_matches_name(common_name, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerProperty;

    fn identity(common_name: &str, sans: &[&str]) -> PeerIdentity {
        let mut identity = PeerIdentity::default();
        identity.push(PeerProperty::new(SUBJECT_COMMON_NAME_PROPERTY, common_name));
        for san in sans {
            identity.push(PeerProperty::new(SUBJECT_ALTERNATIVE_NAME_PROPERTY, *san));
        }
        identity
    }

    #[test]
    fn classifies_ip_literals() {
        assert!(looks_like_ip_address("192.168.0.1"));
        assert!(looks_like_ip_address("::1"));
        assert!(!looks_like_ip_address("192.168.0"));
        assert!(!looks_like_ip_address("192.168.0.1.5"));
        assert!(!looks_like_ip_address("1234.1.1.1"));
        assert!(!looks_like_ip_address("foo.example.com"));
    }

    #[test]
    fn wildcard_covers_exactly_one_label() {
        assert!(entry_matches_name("*.example.com", "foo.example.com"));
        assert!(!entry_matches_name("*.example.com", "example.com"));
        assert!(!entry_matches_name("*.example.com", "foo.bar.example.com"));
        assert!(!entry_matches_name("*.com", "example.com"));
        assert!(entry_matches_name("*.example.com.", "foo.example.com."));
    }

    #[test]
    fn trailing_dots_are_ignored_once() {
        assert!(entry_matches_name("example.com", "example.com."));
        assert!(entry_matches_name("example.com.", "example.com"));
        assert!(!entry_matches_name(".", "example.com"));
        assert!(!entry_matches_name("", ""));
    }

    #[test]
    fn san_presence_disables_common_name_fallback() {
        let peer = identity("foo.example.com", &["bar.example.com"]);
        assert!(!peer_matches_name(&peer, "foo.example.com"));
        assert!(peer_matches_name(&peer, "bar.example.com"));
        let cn_only = identity("foo.example.com", &[]);
        assert!(peer_matches_name(&cn_only, "foo.example.com"));
    }

    #[test]
    fn ip_literals_need_exact_san() {
        assert!(peer_matches_name(&identity("", &["192.168.0.1"]), "192.168.0.1"));
        assert!(!peer_matches_name(&identity("", &["*.168.0.1"]), "192.168.0.1"));
        assert!(!peer_matches_name(&identity("192.168.0.1", &[]), "192.168.0.1"));
    }
}
