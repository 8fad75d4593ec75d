use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use spark_rsocket::RSocketError;
use url::{Host, Url};

/// 传输地址，例如 `tcp://user-service:7000` 或 `ws://10.0.0.3:8080/rsocket`。
///
/// # 教案式说明
/// - **意图（Why）**：注册表需要区分“IP 字面量地址”（直连）与“逻辑服务名”（经服务发现），
///   并在替换主机与端口后保留 scheme 与路径；
/// - **契约（What）**：
///   - 解析失败或缺少主机时返回 [`RSocketError::InvalidArgument`]；
///   - `tcp` 等非特殊 scheme 的 IPv4 主机会被 `url` 视为不透明主机，[`Self::is_ip_literal`] 对此额外做一次 IP 解析。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportAddress {
    url: Url,
}

impl TransportAddress {
    pub fn parse(input: &str) -> Result<Self, RSocketError> {
        let url = Url::parse(input).map_err(|err| {
            RSocketError::invalid_argument(format!("cannot parse transport address `{input}`: {err}"))
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RSocketError::invalid_argument(format!(
                "transport address `{input}` has no host"
            )));
        }
        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// 主机名，IPv6 不带方括号。
    pub fn host(&self) -> &str {
        let host = self.url.host_str().unwrap_or_default();
        host.strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// 显式端口，或 scheme 的已知默认端口。
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    pub fn is_ip_literal(&self) -> bool {
        match self.url.host() {
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
            Some(Host::Domain(domain)) => domain.parse::<IpAddr>().is_ok(),
            None => false,
        }
    }

    /// 逻辑服务名，即服务发现的查询键。
    pub fn service_name(&self) -> &str {
        self.host()
    }

    /// 以实例主机与端口替换本地址的端点，保留 scheme、路径与查询参数。
    pub fn with_endpoint(&self, host: &str, port: u16) -> Result<Self, RSocketError> {
        let mut url = self.url.clone();
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_owned()
        };
        url.set_host(Some(&host)).map_err(|err| {
            RSocketError::invalid_argument(format!("invalid instance host `{host}`: {err}"))
        })?;
        url.set_port(Some(port)).map_err(|()| {
            RSocketError::invalid_argument(format!(
                "scheme `{}` does not accept a port",
                self.scheme()
            ))
        })?;
        Ok(Self { url })
    }

    /// `host:port` 形式的端点键；IPv6 主机保留方括号，端口缺省时只含主机。
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for TransportAddress {
    type Err = RSocketError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_ip_literals_from_logical_names() {
        let ipv4 = TransportAddress::parse("tcp://10.0.0.7:7000").expect("ipv4");
        let ipv6 = TransportAddress::parse("tcp://[::1]:7000").expect("ipv6");
        let ws = TransportAddress::parse("ws://192.168.1.2/rsocket").expect("ws");
        let logical = TransportAddress::parse("tcp://user-service:7000").expect("logical");

        assert!(ipv4.is_ip_literal());
        assert!(ipv6.is_ip_literal());
        assert!(ws.is_ip_literal());
        assert!(!logical.is_ip_literal());
        assert_eq!(logical.service_name(), "user-service");
        assert_eq!(ipv6.host(), "::1");
        assert_eq!(ws.port(), Some(80));
    }

    #[test]
    fn with_endpoint_keeps_scheme_and_path() {
        let logical = TransportAddress::parse("ws://chat-service:9000/rsocket").expect("logical");
        let instance = logical.with_endpoint("10.1.2.3", 9100).expect("endpoint");
        assert_eq!(instance.as_str(), "ws://10.1.2.3:9100/rsocket");

        let v6 = TransportAddress::parse("tcp://user-service:7000")
            .expect("logical")
            .with_endpoint("fe80::1", 7001)
            .expect("ipv6 endpoint");
        assert_eq!(v6.host(), "fe80::1");
        assert!(v6.is_ip_literal());
    }

    #[test]
    fn authority_brackets_ipv6_hosts() {
        let logical = TransportAddress::parse("tcp://user-service:7000").expect("logical");
        let v6 = logical.with_endpoint("fe80::1", 7001).expect("ipv6 endpoint");
        let v4 = logical.with_endpoint("10.0.0.9", 7001).expect("ipv4 endpoint");
        let ws_default = TransportAddress::parse("ws://chat-service/rsocket").expect("ws");

        assert_eq!(v6.authority(), "[fe80::1]:7001");
        assert_eq!(v4.authority(), "10.0.0.9:7001");
        assert_eq!(ws_default.authority(), "chat-service:80");
    }

    #[test]
    fn rejects_addresses_without_host() {
        let err = TransportAddress::parse("not an address").expect_err("garbage");
        assert!(err.is_invalid_argument());
    }
}
