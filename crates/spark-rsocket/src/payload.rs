use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

/// 一次交互携带的消息：数据面与元数据面。
///
/// # 教案式说明
/// - **意图（Why）**：拦截层只观察消息，不做编解码，因此以 [`Bytes`] 承载原始字节，克隆为引用计数开销；
/// - **契约（What）**：`metadata` 缺省表示对端未发送元数据帧，与“空元数据”语义不同。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>, metadata: Option<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// 仅携带数据面的消息。
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self::new(data, None)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn into_parts(self) -> (Bytes, Option<Bytes>) {
        (self.data, self.metadata)
    }
}

/// 数据面或元数据面的 MIME 类型。
///
/// 两个平面各自独立声明，拦截器可据此判断是否需要解析元数据（例如路由元数据）。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MimeType(Cow<'static, str>);

impl MimeType {
    pub const APPLICATION_JSON: MimeType = MimeType::from_static("application/json");
    pub const OCTET_STREAM: MimeType = MimeType::from_static("application/octet-stream");
    pub const TEXT_PLAIN: MimeType = MimeType::from_static("text/plain");
    /// RSocket 复合元数据扩展。
    pub const COMPOSITE_METADATA: MimeType =
        MimeType::from_static("message/x.rsocket.composite-metadata.v0");
    /// RSocket 路由元数据扩展。
    pub const ROUTING: MimeType = MimeType::from_static("message/x.rsocket.routing.v0");

    pub const fn from_static(value: &'static str) -> Self {
        MimeType(Cow::Borrowed(value))
    }

    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        MimeType(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_without_metadata_differs_from_empty_metadata() {
        let bare = Payload::from_data("ping");
        let empty = Payload::new("ping", Some(Bytes::new()));
        assert!(!bare.has_metadata());
        assert!(empty.has_metadata());
        assert_ne!(bare, empty);
    }

    #[test]
    fn owned_and_static_mime_types_compare_equal() {
        assert_eq!(
            MimeType::new(String::from("application/json")),
            MimeType::APPLICATION_JSON
        );
        assert_eq!(MimeType::ROUTING.to_string(), "message/x.rsocket.routing.v0");
    }
}
