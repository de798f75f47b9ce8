//! People known to the bot across endpoints: forge login, chat nick, email.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One `[[users]]` entry. Only `key` is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserContact {
    pub key: String,
    #[serde(default)]
    pub github_login: Option<String>,
    #[serde(default)]
    pub chat_nick: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserContact {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            github_login: None,
            chat_nick: None,
            email: None,
        }
    }

    pub fn with_github_login(mut self, login: impl Into<String>) -> Self {
        self.github_login = Some(login.into());
        self
    }

    pub fn with_chat_nick(mut self, nick: impl Into<String>) -> Self {
        self.chat_nick = Some(nick.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDirectory {
    users: Vec<UserContact>,
}

impl UserDirectory {
    pub fn new(users: Vec<UserContact>) -> Self {
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserContact> {
        self.users.iter()
    }

    pub fn get(&self, key: &str) -> Option<&UserContact> {
        self.users.iter().find(|user| user.key == key)
    }

    /// Forge logins compare case-insensitively.
    pub fn by_github_login(&self, login: &str) -> Option<&UserContact> {
        self.users.iter().find(|user| {
            user.github_login
                .as_deref()
                .is_some_and(|known| known.eq_ignore_ascii_case(login))
        })
    }

    pub fn by_chat_nick(&self, nick: &str) -> Option<&UserContact> {
        self.users
            .iter()
            .find(|user| user.chat_nick.as_deref() == Some(nick))
    }

    /// How to address a forge user in chat: their nick when known, the
    /// login otherwise.
    pub fn chat_name(&self, login: &str) -> String {
        self.by_github_login(login)
            .and_then(|user| user.chat_nick.clone())
            .unwrap_or_else(|| login.to_string())
    }

    /// Emails of the given forge logins, first occurrence order, skipping
    /// unknown users and users without an address.
    pub fn emails_of<'a>(&self, logins: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        logins
            .into_iter()
            .filter_map(|login| self.by_github_login(login)?.email.clone())
            .filter(|email| seen.insert(email.clone()))
            .collect()
    }

    /// First key that appears more than once.
    pub fn duplicate_key(&self) -> Option<&str> {
        let mut keys = BTreeSet::new();
        self.users
            .iter()
            .map(|user| user.key.as_str())
            .find(|key| !keys.insert(*key))
    }
}
