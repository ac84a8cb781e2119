//! Email address parsing (RFC 5322 §3.4).

use serde::{Deserialize, Serialize};

/// A parsed mailbox address as exposed in message details.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `name = Some("Juan García")`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `name = None`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Human-readable display name, if one was given.
    #[serde(default)]
    pub name: Option<String>,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single mailbox from a (decoded) header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Comment Name)"`
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let Some(angle_start) = trimmed.rfind('<') {
            if let Some(angle_end) = trimmed.rfind('>') {
                if angle_end > angle_start {
                    let address = trimmed[angle_start + 1..angle_end].trim().to_string();
                    let name = strip_quotes(&trimmed[..angle_start]);
                    return Self {
                        name: non_empty(name),
                        address,
                    };
                }
            }
        }

        // Legacy "addr (Name)" form
        if let (Some(open), true) = (trimmed.find('('), trimmed.ends_with(')')) {
            let address = trimmed[..open].trim().to_string();
            let name = trimmed[open + 1..trimmed.len() - 1].trim().to_string();
            if address.contains('@') {
                return Self {
                    name: non_empty(name),
                    address,
                };
            }
        }

        Self {
            name: None,
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated address list.
    ///
    /// Handles quoted commas (`"Last, First" <a@b.com>, other@c.com`) and
    /// flattens RFC 5322 groups (`Team: a@b.com, c@d.com;`) into their members.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        let mut flush = |current: &mut String| {
            let addr = Self::parse(current);
            if !addr.address.is_empty() {
                results.push(addr);
            }
            current.clear();
        };

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                // Group display name: drop it, keep collecting members
                ':' if !in_quotes && !in_angle => current.clear(),
                ',' | ';' if !in_quotes && !in_angle => flush(&mut current),
                _ => current.push(ch),
            }
        }
        flush(&mut current);

        results
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        match self.name {
            Some(ref name) => format!("{} <{}>", name, self.address),
            None => self.address.clone(),
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
