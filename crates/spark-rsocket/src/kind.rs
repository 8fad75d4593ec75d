use core::fmt;

/// RSocket 交互类型。
///
/// # 教案式说明
/// - **意图（Why）**：拦截器需要按交互类型区分行为，例如日志中间件对 `Setup` 不做记录；
/// - **契约（What）**：六个变体固定不变，[`Self::is_request_kind`] 仅对 `Setup` 返回 `false`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionKind {
    /// 连接建立时的 SETUP 帧，不可交互。
    Setup,
    FireAndForget,
    RequestResponse,
    RequestStream,
    /// 双向流。
    RequestChannel,
    MetadataPush,
}

impl InteractionKind {
    /// 全部交互类型，顺序与 [`Self::index`] 一致。
    pub const ALL: [InteractionKind; 6] = [
        InteractionKind::Setup,
        InteractionKind::FireAndForget,
        InteractionKind::RequestResponse,
        InteractionKind::RequestStream,
        InteractionKind::RequestChannel,
        InteractionKind::MetadataPush,
    ];

    /// 是否为真正的请求交互。
    pub const fn is_request_kind(self) -> bool {
        !matches!(self, InteractionKind::Setup)
    }

    /// 稳定的低基数标签，用于日志与指标。
    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Setup => "setup",
            InteractionKind::FireAndForget => "fire_and_forget",
            InteractionKind::RequestResponse => "request_response",
            InteractionKind::RequestStream => "request_stream",
            InteractionKind::RequestChannel => "request_channel",
            InteractionKind::MetadataPush => "metadata_push",
        }
    }

    /// 在 [`Self::ALL`] 中的下标，供按类型分桶的计数器使用。
    pub const fn index(self) -> usize {
        match self {
            InteractionKind::Setup => 0,
            InteractionKind::FireAndForget => 1,
            InteractionKind::RequestResponse => 2,
            InteractionKind::RequestStream => 3,
            InteractionKind::RequestChannel => 4,
            InteractionKind::MetadataPush => 5,
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_is_not_a_request() {
        for kind in InteractionKind::ALL {
            assert_eq!(kind.is_request_kind(), kind != InteractionKind::Setup);
        }
    }

    #[test]
    fn index_matches_all_order() {
        for (idx, kind) in InteractionKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), idx);
        }
    }
}
