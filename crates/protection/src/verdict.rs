use rasp_ip_lists::IpListMatch;
use serde::{Deserialize, Serialize};

/// How the interception layer should stop the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockHandling {
    /// Respond from the application's own request context.
    Store,
    /// Terminate the request immediately.
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Blocked,
    Ratelimited,
}

/// Everything the interception layer needs to refuse a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAction {
    pub action: BlockHandling,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// `user`, `ip`, `user-agent` or `group`.
    pub trigger: String,
    pub description: String,
    pub data: String,
    pub message: String,
    pub response_code: u16,
}

impl BlockAction {
    pub fn new(
        action: BlockHandling,
        kind: BlockKind,
        trigger: &str,
        description: &str,
        data: &str,
    ) -> Self {
        let response_code = match kind {
            BlockKind::Blocked => 403,
            BlockKind::Ratelimited => 429,
        };
        Self {
            action,
            kind,
            trigger: trigger.to_string(),
            description: escape_html(description),
            data: data.to_string(),
            message: format!("Your {} ({}) is blocked due to: {}!", trigger, data, description),
            response_code,
        }
    }

    pub fn blocked(action: BlockHandling, trigger: &str, description: &str, data: &str) -> Self {
        Self::new(action, BlockKind::Blocked, trigger, description, data)
    }

    pub fn rate_limited(trigger: &str, data: &str) -> Self {
        Self::new(
            BlockHandling::Store,
            BlockKind::Ratelimited,
            trigger,
            &format!("configured rate limit exceeded by current {}", trigger),
            data,
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block(BlockAction),
}

impl Verdict {
    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::Block(_))
    }

    pub fn block_action(&self) -> Option<&BlockAction> {
        match self {
            Verdict::Block(action) => Some(action),
            Verdict::Allow => None,
        }
    }
}

/// Monitored-list hits observed while deciding. They never block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredMatches {
    pub ip_lists: Vec<IpListMatch>,
    pub user_agents: Vec<String>,
}

impl MonitoredMatches {
    pub fn is_empty(&self) -> bool {
        self.ip_lists.is_empty() && self.user_agents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub monitored: MonitoredMatches,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            monitored: MonitoredMatches::default(),
        }
    }

    pub fn block(action: BlockAction) -> Self {
        Self {
            verdict: Verdict::Block(action),
            monitored: MonitoredMatches::default(),
        }
    }

    pub fn with_monitored(mut self, monitored: MonitoredMatches) -> Self {
        self.monitored = monitored;
        self
    }

    pub fn is_block(&self) -> bool {
        self.verdict.is_block()
    }
}
