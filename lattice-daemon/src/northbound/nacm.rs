//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF access control (RFC 8341).
//!
//! The ruleset is rebuilt from the running datastore whenever a commit
//! touches `/ietf-netconf-acm:nacm` (internal mode), or loaded once from a
//! standalone file at startup (external mode). Evaluation never mutates
//! state, so a rebuilt ruleset simply replaces the previous one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bitflags::bitflags;
use lattice_northbound::rpc_error::{ErrorType, RpcError};
use lattice_utils::yang::DataNodeRefExt;
use lattice_yang::YANG_CTX;
use tracing::warn;
use yang3::data::{
    Data, DataFormat, DataParserFlags, DataTree, DataValidationFlags,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AccessRights: u8 {
        const CREATE = 0x01;
        const READ = 0x02;
        const UPDATE = 0x04;
        const DELETE = 0x08;
        const EXEC = 0x10;
        const WRITE = Self::CREATE.bits()
            | Self::UPDATE.bits()
            | Self::DELETE.bits();
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Action {
    Permit,
    #[default]
    Deny,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RuleType {
    // Matches any request.
    #[default]
    Any,
    RpcName(String),
    NotificationName(String),
    DataPath(String),
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub module: String,
    pub rule_type: RuleType,
    pub access: AccessRights,
    pub action: Action,
}

#[derive(Clone, Debug)]
pub struct RuleList {
    pub name: String,
    pub groups: Vec<String>,
    pub rules: Vec<Rule>,
}

// The access-control target of a request.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    Rpc(&'a str),
    Data(&'a str),
    Notification(&'a str),
}

#[derive(Clone, Debug)]
pub struct Nacm {
    pub enabled: bool,
    pub read_default: Action,
    pub write_default: Action,
    pub exec_default: Action,
    groups: BTreeMap<String, BTreeSet<String>>,
    rule_lists: Vec<RuleList>,
}

// ===== impl AccessRights =====

impl AccessRights {
    // Parses the `access-operations` leaf ("*" or space-separated bits).
    fn from_leaf(value: &str) -> AccessRights {
        if value.trim() == "*" {
            return AccessRights::all();
        }
        let mut access = AccessRights::empty();
        for word in value.split_whitespace() {
            match word {
                "create" => access |= AccessRights::CREATE,
                "read" => access |= AccessRights::READ,
                "update" => access |= AccessRights::UPDATE,
                "delete" => access |= AccessRights::DELETE,
                "exec" => access |= AccessRights::EXEC,
                _ => warn!(%word, "unknown access operation"),
            }
        }
        access
    }
}

// ===== impl Action =====

impl Action {
    fn from_leaf(value: &str) -> Action {
        match value {
            "permit" => Action::Permit,
            _ => Action::Deny,
        }
    }
}

// ===== impl Nacm =====

impl Default for Nacm {
    fn default() -> Nacm {
        Nacm {
            enabled: false,
            read_default: Action::Permit,
            write_default: Action::Deny,
            exec_default: Action::Permit,
            groups: BTreeMap::new(),
            rule_lists: Vec::new(),
        }
    }
}

impl Nacm {
    // Builds the ruleset from the `/ietf-netconf-acm:nacm` subtree of the
    // given configuration.
    pub fn from_config(config: &DataTree<'static>) -> Nacm {
        let mut nacm = Nacm::default();

        let root = match config
            .find_xpath("/ietf-netconf-acm:nacm")
            .ok()
            .and_then(|mut iter| iter.next())
        {
            Some(root) => root,
            // No NACM configuration present: enforcement stays disabled.
            None => return nacm,
        };

        nacm.enabled = root.get_bool_relative("enable-nacm").unwrap_or(true);
        if let Some(value) = root.get_string_relative("read-default") {
            nacm.read_default = Action::from_leaf(&value);
        }
        if let Some(value) = root.get_string_relative("write-default") {
            nacm.write_default = Action::from_leaf(&value);
        } else {
            nacm.write_default = Action::Deny;
        }
        if let Some(value) = root.get_string_relative("exec-default") {
            nacm.exec_default = Action::from_leaf(&value);
        }

        // Group membership.
        for group in root
            .find_xpath("groups/group")
            .into_iter()
            .flatten()
        {
            let name = match group.get_string_relative("name") {
                Some(name) => name,
                None => continue,
            };
            let users = group
                .find_xpath("user-name")
                .into_iter()
                .flatten()
                .map(|dnode| dnode.get_string())
                .collect();
            nacm.groups.insert(name, users);
        }

        // Ordered rule lists.
        for rule_list in root.find_xpath("rule-list").into_iter().flatten() {
            let name = match rule_list.get_string_relative("name") {
                Some(name) => name,
                None => continue,
            };
            let groups = rule_list
                .find_xpath("group")
                .into_iter()
                .flatten()
                .map(|dnode| dnode.get_string())
                .collect();
            let mut rules = Vec::new();
            for rule in rule_list.find_xpath("rule").into_iter().flatten() {
                let rule_name = match rule.get_string_relative("name") {
                    Some(rule_name) => rule_name,
                    None => continue,
                };
                let rule_type = if let Some(rpc_name) =
                    rule.get_string_relative("rpc-name")
                {
                    RuleType::RpcName(rpc_name)
                } else if let Some(notification) =
                    rule.get_string_relative("notification-name")
                {
                    RuleType::NotificationName(notification)
                } else if let Some(path) = rule.get_string_relative("path") {
                    RuleType::DataPath(path)
                } else {
                    RuleType::Any
                };
                rules.push(Rule {
                    name: rule_name,
                    module: rule
                        .get_string_relative("module-name")
                        .unwrap_or_else(|| "*".to_owned()),
                    rule_type,
                    access: rule
                        .get_string_relative("access-operations")
                        .map(|value| AccessRights::from_leaf(&value))
                        .unwrap_or_else(AccessRights::all),
                    action: rule
                        .get_string_relative("action")
                        .map(|value| Action::from_leaf(&value))
                        .unwrap_or_default(),
                });
            }
            nacm.rule_lists.push(RuleList {
                name,
                groups,
                rules,
            });
        }

        nacm
    }

    // Loads the ruleset from a standalone XML file (external mode).
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Nacm> {
        let yang_ctx = YANG_CTX.get().unwrap();
        let data = std::fs::read_to_string(path)?;
        let config = DataTree::parse_string(
            yang_ctx,
            &data,
            DataFormat::XML,
            DataParserFlags::NO_VALIDATION,
            DataValidationFlags::NO_STATE,
        )
        .map_err(|error| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, error)
        })?;
        Ok(Nacm::from_config(&config))
    }

    // RFC 8341 access evaluation for an RPC invocation.
    pub fn check_rpc(
        &self,
        username: &str,
        recovery: bool,
        rpc_name: &str,
    ) -> Result<(), RpcError> {
        self.check(
            username,
            recovery,
            AccessRights::EXEC,
            Target::Rpc(rpc_name),
        )
    }

    // RFC 8341 access evaluation for a data-node access.
    pub fn check_data(
        &self,
        username: &str,
        recovery: bool,
        access: AccessRights,
        path: &str,
    ) -> Result<(), RpcError> {
        self.check(username, recovery, access, Target::Data(path))
    }

    fn check(
        &self,
        username: &str,
        recovery: bool,
        access: AccessRights,
        target: Target<'_>,
    ) -> Result<(), RpcError> {
        // Enforcement disabled, or an emergency recovery session.
        if !self.enabled || recovery {
            return Ok(());
        }

        let groups = self.user_groups(username);

        for rule_list in &self.rule_lists {
            if !rule_list
                .groups
                .iter()
                .any(|group| group == "*" || groups.contains(group.as_str()))
            {
                continue;
            }
            for rule in &rule_list.rules {
                if !rule.matches(access, target) {
                    continue;
                }
                return match rule.action {
                    Action::Permit => Ok(()),
                    Action::Deny => Err(denial(target, "access denied")),
                };
            }
        }

        // No rule matched: fall back to the applicable default.
        let default = match target {
            Target::Rpc(_) => self.exec_default,
            Target::Notification(_) => self.read_default,
            Target::Data(_) => {
                if access.intersects(AccessRights::WRITE) {
                    self.write_default
                } else {
                    self.read_default
                }
            }
        };
        match default {
            Action::Permit => Ok(()),
            Action::Deny => Err(denial(target, "default deny")),
        }
    }

    fn user_groups(&self, username: &str) -> BTreeSet<&str> {
        self.groups
            .iter()
            .filter(|(_, users)| users.contains(username))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ===== impl Rule =====

impl Rule {
    fn matches(&self, access: AccessRights, target: Target<'_>) -> bool {
        if !self.access.intersects(access) {
            return false;
        }
        if self.module != "*" {
            if let Some(module) = target_module(target) {
                if self.module != module {
                    return false;
                }
            }
        }
        match (&self.rule_type, target) {
            (RuleType::Any, _) => true,
            (RuleType::RpcName(name), Target::Rpc(rpc)) => {
                name == "*" || name == rpc
            }
            (RuleType::DataPath(path), Target::Data(requested)) => {
                requested.starts_with(path.as_str())
            }
            (
                RuleType::NotificationName(name),
                Target::Notification(notification),
            ) => name == "*" || name == notification,
            _ => false,
        }
    }
}

// ===== helper functions =====

// The module name of a data path like "/ietf-netconf-acm:nacm/...".
fn target_module(target: Target<'_>) -> Option<&str> {
    match target {
        Target::Data(path) => {
            let rest = path.strip_prefix('/')?;
            let module = rest.split('/').next()?.split(':').next()?;
            Some(module)
        }
        Target::Rpc(_) | Target::Notification(_) => None,
    }
}

fn denial(target: Target<'_>, message: &str) -> RpcError {
    // Data-access denials are application errors; RPC authorization
    // failures are protocol errors.
    let error_type = match target {
        Target::Rpc(_) => ErrorType::Protocol,
        Target::Data(_) | Target::Notification(_) => ErrorType::Application,
    };
    RpcError::access_denied(error_type, message)
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use lattice_northbound::rpc_error::ErrorTag;

    use super::*;
    use crate::northbound::tests::{context_init, parse_config};

    fn nacm_from_xml(xml: &str) -> Nacm {
        context_init();
        let config = parse_config(xml);
        Nacm::from_config(&config)
    }

    const RULESET: &str = concat!(
        "<nacm xmlns=\"urn:ietf:params:xml:ns:yang:ietf-netconf-acm\">",
        "<enable-nacm>true</enable-nacm>",
        "<read-default>permit</read-default>",
        "<write-default>deny</write-default>",
        "<exec-default>permit</exec-default>",
        "<groups>",
        "<group><name>admin</name><user-name>alice</user-name></group>",
        "<group><name>limited</name><user-name>bob</user-name></group>",
        "</groups>",
        "<rule-list><name>admin-acl</name><group>admin</group>",
        "<rule><name>permit-all</name>",
        "<module-name>*</module-name>",
        "<access-operations>*</access-operations>",
        "<action>permit</action></rule>",
        "</rule-list>",
        "<rule-list><name>limited-acl</name><group>limited</group>",
        "<rule><name>no-commit</name>",
        "<rpc-name>commit</rpc-name>",
        "<access-operations>exec</access-operations>",
        "<action>deny</action></rule>",
        "<rule><name>read-system</name>",
        "<module-name>lattice-system</module-name>",
        "<access-operations>read</access-operations>",
        "<action>permit</action></rule>",
        "</rule-list>",
        "</nacm>"
    );

    #[test]
    fn disabled_permits_everything() {
        let nacm = Nacm::default();
        assert!(nacm.check_rpc("nobody", false, "edit-config").is_ok());
        assert!(
            nacm.check_data(
                "nobody",
                false,
                AccessRights::WRITE,
                "/lattice-system:system"
            )
            .is_ok()
        );
    }

    #[test]
    fn matching_permit_rule_wins() {
        let nacm = nacm_from_xml(RULESET);
        assert!(nacm.check_rpc("alice", false, "commit").is_ok());
        assert!(
            nacm.check_data(
                "alice",
                false,
                AccessRights::WRITE,
                "/lattice-system:system/hostname"
            )
            .is_ok()
        );
    }

    #[test]
    fn matching_deny_rule_says_access_denied() {
        let nacm = nacm_from_xml(RULESET);
        let error = nacm.check_rpc("bob", false, "commit").unwrap_err();
        assert_eq!(error.tag, ErrorTag::AccessDenied);
        assert_eq!(error.error_type, ErrorType::Protocol);
        assert_eq!(error.message.as_deref(), Some("access denied"));
    }

    #[test]
    fn unmatched_write_falls_back_to_default_deny() {
        let nacm = nacm_from_xml(RULESET);
        let error = nacm
            .check_data(
                "bob",
                false,
                AccessRights::WRITE,
                "/lattice-system:system/hostname",
            )
            .unwrap_err();
        assert_eq!(error.tag, ErrorTag::AccessDenied);
        assert_eq!(error.error_type, ErrorType::Application);
        assert_eq!(error.message.as_deref(), Some("default deny"));
    }

    #[test]
    fn module_scoped_read_rule() {
        let nacm = nacm_from_xml(RULESET);
        assert!(
            nacm.check_data(
                "bob",
                false,
                AccessRights::READ,
                "/lattice-system:system/hostname"
            )
            .is_ok()
        );
    }

    #[test]
    fn recovery_session_bypasses_enforcement() {
        let nacm = nacm_from_xml(RULESET);
        assert!(nacm.check_rpc("root", true, "kill-session").is_ok());
    }

    #[test]
    fn unknown_user_gets_exec_default() {
        let nacm = nacm_from_xml(RULESET);
        // exec-default is permit.
        assert!(nacm.check_rpc("mallory", false, "get-config").is_ok());
    }
}
