use serde::{Deserialize, Serialize};
use std::fmt;

/// Server part of regular WhatsApp user JIDs.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server part of group JIDs.
pub const GROUP_SERVER: &str = "g.us";

/// JID represents a WhatsApp user, device or group identifier.
///
/// The canonical string form is `user@server` for bare JIDs and
/// `user:device@server` for addressable devices (`device` 0 is the
/// primary device and is omitted when formatting).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// Create a new bare JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// Create a device JID on the default user server.
    pub fn new_device(user: impl Into<String>, device: u16) -> Self {
        Self {
            user: user.into(),
            device,
            server: DEFAULT_USER_SERVER.to_string(),
        }
    }

    /// Create a new group JID.
    pub fn new_group(group_id: impl Into<String>) -> Self {
        Self::new(group_id, GROUP_SERVER)
    }

    /// Parse a JID from its string form.
    pub fn parse(jid_str: &str) -> Result<Self, crate::error::Error> {
        let (user_part, server) = jid_str
            .split_once('@')
            .ok_or_else(|| crate::error::Error::InvalidJid(format!("missing @ in {:?}", jid_str)))?;
        if server.is_empty() {
            return Err(crate::error::Error::InvalidJid(format!(
                "empty server in {:?}",
                jid_str
            )));
        }

        let (user, device) = match user_part.split_once(':') {
            Some((user, device)) => {
                let device = device.parse().map_err(|_| {
                    crate::error::Error::InvalidJid(format!("invalid device part in {:?}", jid_str))
                })?;
                (user, device)
            }
            None => (user_part, 0),
        };

        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// The bare JID with any device part stripped.
    pub fn to_non_ad(&self) -> Jid {
        Jid::new(self.user.clone(), self.server.clone())
    }

    /// The `user:device` form used to address Signal sessions and
    /// identity keys. Device 0 is kept explicit here.
    pub fn signal_address(&self) -> String {
        format!("{}:{}", self.user, self.device)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device != 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl std::str::FromStr for Jid {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_parsing() {
        let jid = Jid::parse("1234567890@s.whatsapp.net").unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 0);
        assert_eq!(jid.server, "s.whatsapp.net");
        assert_eq!(jid.to_string(), "1234567890@s.whatsapp.net");
    }

    #[test]
    fn test_device_jid() {
        let jid = Jid::parse("111:1@s.whatsapp.net").unwrap();
        assert_eq!(jid.user, "111");
        assert_eq!(jid.device, 1);
        assert_eq!(jid.to_string(), "111:1@s.whatsapp.net");
        assert_eq!(jid.signal_address(), "111:1");
        assert_eq!(jid.to_non_ad().to_string(), "111@s.whatsapp.net");
    }

    #[test]
    fn test_group_jid() {
        let group = Jid::new_group("groupid123");
        assert_eq!(group.server, "g.us");
        assert!(group.is_group());
    }

    #[test]
    fn test_invalid_jid() {
        assert!(Jid::parse("no-server").is_err());
        assert!(Jid::parse("user:abc@s.whatsapp.net").is_err());
    }
}
