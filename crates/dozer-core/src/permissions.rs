//! Gateway-neutral permission model.

use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    Administrator,
    ManageGuild,
    ManageChannels,
    ManageRoles,
    ManageMessages,
    KickMembers,
    BanMembers,
    SendMessages,
    EmbedLinks,
    AddReactions,
    ReadMessageHistory,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::Administrator,
        Permission::ManageGuild,
        Permission::ManageChannels,
        Permission::ManageRoles,
        Permission::ManageMessages,
        Permission::KickMembers,
        Permission::BanMembers,
        Permission::SendMessages,
        Permission::EmbedLinks,
        Permission::AddReactions,
        Permission::ReadMessageHistory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Administrator => "administrator",
            Permission::ManageGuild => "manage_guild",
            Permission::ManageChannels => "manage_channels",
            Permission::ManageRoles => "manage_roles",
            Permission::ManageMessages => "manage_messages",
            Permission::KickMembers => "kick_members",
            Permission::BanMembers => "ban_members",
            Permission::SendMessages => "send_messages",
            Permission::EmbedLinks => "embed_links",
            Permission::AddReactions => "add_reactions",
            Permission::ReadMessageHistory => "read_message_history",
        }
    }

    /// User-facing label: `manage_guild` becomes `Manage Server`.
    pub fn label(self) -> String {
        self.as_str()
            .replace("guild", "server")
            .split('_')
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A set of granted (or required) permissions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(Permission::ALL.into_iter().collect())
    }

    pub fn insert(&mut self, p: Permission) {
        self.0.insert(p);
    }

    pub fn contains(&self, p: Permission) -> bool {
        self.0.contains(&Permission::Administrator) || self.0.contains(&p)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// Permissions in `required` not granted by `self`, in declaration order.
    pub fn missing(&self, required: &[Permission]) -> Vec<Permission> {
        required
            .iter()
            .copied()
            .filter(|p| !self.contains(*p))
            .collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Join words as "a", "a and b", "a, b, and c".
pub fn pretty_concat(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}
