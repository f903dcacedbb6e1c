use crate::config::DirectoryConfig;
use crate::events::ChannelKind;
use log::warn;
use std::collections::HashMap;

/// Read-only mapping of role -> channel -> addresses
#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    roles: HashMap<String, HashMap<ChannelKind, Vec<String>>>,
}

impl RecipientDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let mut roles = HashMap::new();
        for (role, channels) in &config.roles {
            let mut by_channel = HashMap::new();
            for (name, addresses) in channels {
                match name.parse::<ChannelKind>() {
                    Ok(channel) => {
                        by_channel.insert(channel, addresses.clone());
                    }
                    Err(e) => warn!("Ignoring directory entry for role '{}': {}", role, e),
                }
            }
            roles.insert(role.clone(), by_channel);
        }
        Self { roles }
    }

    /// Addresses of `role` on `channel`; empty when either is unknown
    pub fn addresses(&self, role: &str, channel: ChannelKind) -> &[String] {
        self.roles
            .get(role)
            .and_then(|channels| channels.get(&channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Distinct (channel, address) pairs for the given roles and channels, in order
    pub fn resolve(&self, roles: &[String], channels: &[ChannelKind]) -> Vec<(ChannelKind, String)> {
        let mut pairs: Vec<(ChannelKind, String)> = Vec::new();
        for &channel in channels {
            for role in roles {
                for address in self.addresses(role, channel) {
                    if !pairs.iter().any(|(c, a)| *c == channel && a == address) {
                        pairs.push((channel, address.clone()));
                    }
                }
            }
        }
        pairs
    }

    /// Channels on which `role` has at least one address
    pub fn channels_for(&self, role: &str) -> Vec<ChannelKind> {
        let mut channels: Vec<ChannelKind> = self
            .roles
            .get(role)
            .map(|c| {
                c.iter()
                    .filter(|(_, addresses)| !addresses.is_empty())
                    .map(|(channel, _)| *channel)
                    .collect()
            })
            .unwrap_or_default();
        channels.sort();
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn directory() -> RecipientDirectory {
        let mut config = DirectoryConfig::default();
        let mut shared = BTreeMap::new();
        shared.insert("email".to_string(), vec!["ops@example.com".to_string()]);
        config.roles.insert("admin".to_string(), shared.clone());
        config.roles.insert("dev_team".to_string(), shared);
        RecipientDirectory::from_config(&config)
    }

    #[test]
    fn test_default_directory() {
        let directory = RecipientDirectory::from_config(&DirectoryConfig::default());
        assert_eq!(directory.addresses("admin", ChannelKind::Chat), ["@admin"]);
        assert_eq!(
            directory.addresses("dev_team", ChannelKind::Email),
            ["dev_team@localhost"]
        );
        assert!(directory.addresses("admin", ChannelKind::Sms).is_empty());
        assert!(directory.addresses("nobody", ChannelKind::Chat).is_empty());
    }

    #[test]
    fn test_resolve_deduplicates_addresses() {
        let directory = directory();
        let roles = vec!["admin".to_string(), "dev_team".to_string()];
        let pairs = directory.resolve(&roles, &[ChannelKind::Email, ChannelKind::Sms]);
        assert_eq!(
            pairs,
            vec![(ChannelKind::Email, "ops@example.com".to_string())]
        );
    }

    #[test]
    fn test_channels_for_role() {
        let directory = RecipientDirectory::from_config(&DirectoryConfig::default());
        assert_eq!(
            directory.channels_for("senior_dev"),
            vec![ChannelKind::Chat, ChannelKind::Email]
        );
        assert!(directory.channels_for("nobody").is_empty());
    }
}
