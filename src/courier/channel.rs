//! Outbound channel identifiers.
//!
//! A [`ChannelMethod`] names the delivery channel a conversation is initiated
//! over. The string form is part of the external contract: it appears in the
//! inbound request (`request_data.channel_method`), in queue message
//! attributes, and in the stored conversation record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery channel for the first outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMethod {
    /// WhatsApp template message via the messaging provider.
    Whatsapp,
    /// Plain SMS via the messaging provider.
    Sms,
    /// Transactional email via the email provider.
    Email,
}

impl ChannelMethod {
    /// Parse the wire string (`"whatsapp"`, `"sms"`, `"email"`).
    ///
    /// # Example
    ///
    /// ```rust
    /// use courier::channel::ChannelMethod;
    ///
    /// assert_eq!(ChannelMethod::parse("whatsapp"), Some(ChannelMethod::Whatsapp));
    /// assert_eq!(ChannelMethod::parse("carrier-pigeon"), None);
    /// ```
    pub fn parse(value: &str) -> Option<ChannelMethod> {
        match value {
            "whatsapp" => Some(ChannelMethod::Whatsapp),
            "sms" => Some(ChannelMethod::Sms),
            "email" => Some(ChannelMethod::Email),
            _ => None,
        }
    }

    /// The stable wire name of this channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelMethod::Whatsapp => "whatsapp",
            ChannelMethod::Sms => "sms",
            ChannelMethod::Email => "email",
        }
    }

    /// All supported channels, in contract order.
    pub fn all() -> [ChannelMethod; 3] {
        [ChannelMethod::Whatsapp, ChannelMethod::Sms, ChannelMethod::Email]
    }

    /// Whether the recipient identifier for this channel is a telephone
    /// number (and therefore must be E.164-shaped).
    pub fn requires_tel(&self) -> bool {
        match self {
            ChannelMethod::Whatsapp | ChannelMethod::Sms => true,
            ChannelMethod::Email => false,
        }
    }
}

impl fmt::Display for ChannelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_all_channels() {
        for channel in ChannelMethod::all().iter() {
            assert_eq!(ChannelMethod::parse(channel.as_str()), Some(*channel));
        }
    }

    #[test]
    fn parse_rejects_unknown_and_case_variants() {
        assert_eq!(ChannelMethod::parse("WhatsApp"), None);
        assert_eq!(ChannelMethod::parse("fax"), None);
        assert_eq!(ChannelMethod::parse(""), None);
    }

    #[test]
    fn serde_uses_lowercase_wire_names() {
        let json = serde_json::to_string(&ChannelMethod::Email).unwrap();
        assert_eq!(json, "\"email\"");
        let back: ChannelMethod = serde_json::from_str("\"sms\"").unwrap();
        assert_eq!(back, ChannelMethod::Sms);
    }
}
