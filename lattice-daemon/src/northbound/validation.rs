//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! Candidate configuration validation.
//!
//! Structural rules that can be checked without evaluating XPath are walked
//! in document order so that multiple violations are reported together, up
//! to [`MAX_ERRORS`]. The remaining schema rules (types, ranges, unique,
//! leafref, when/must, min/max-elements) are enforced by a full libyang
//! validation pass whose diagnostics are mapped onto the NETCONF error
//! taxonomy.

use lattice_northbound::rpc_error::{
    ErrorInfo, ErrorTag, ErrorType, RpcError,
};
use yang3::data::{Data, DataNodeRef, DataTree, DataValidationFlags};
use yang3::schema::{SchemaNode, SchemaNodeKind};

// Errors are collected up to this cap, then reporting stops.
pub const MAX_ERRORS: usize = 64;

// ===== global functions =====

// Validates a configuration tree against the loaded schema.
pub fn validate(config: &DataTree<'static>) -> Result<(), Vec<RpcError>> {
    let mut errors = Vec::new();

    // Document-order structural walk.
    for dnode in config.traverse() {
        if errors.len() >= MAX_ERRORS {
            break;
        }
        let snode = dnode.schema();
        if matches!(
            snode.kind(),
            SchemaNodeKind::Container | SchemaNodeKind::List
        ) {
            check_children(&dnode, &mut errors);
        }
    }

    // Full schema validation on a scratch copy (validation inserts default
    // nodes, the caller's tree must stay untouched).
    if errors.len() < MAX_ERRORS {
        match config.duplicate() {
            Ok(mut scratch) => {
                if let Err(error) =
                    scratch.validate(DataValidationFlags::NO_STATE)
                {
                    errors.push(map_validation_error(&error));
                }
            }
            Err(error) => {
                errors.push(RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        errors.truncate(MAX_ERRORS);
        Err(errors)
    }
}

// Maps a libyang parse failure onto the NETCONF error taxonomy.
pub fn map_parse_error(error: &yang3::Error) -> RpcError {
    let message = error
        .msg
        .clone()
        .unwrap_or_else(|| "invalid configuration data".to_owned());
    let mut rpc_error = if message.contains("not found")
        || message.contains("Unknown element")
    {
        RpcError::unknown_element(
            ErrorType::Application,
            element_in_quotes(&message).unwrap_or_default(),
        )
        .with_message(message)
    } else if message.contains("namespace") {
        RpcError::unknown_namespace(
            ErrorType::Application,
            element_in_quotes(&message).unwrap_or_default(),
            String::new(),
        )
        .with_message(message)
    } else {
        RpcError::invalid_value(ErrorType::Application, message)
    };
    if let Some(path) = &error.path {
        rpc_error = rpc_error.with_path(path);
    }
    rpc_error
}

// ===== helper functions =====

// Checks the schema-mandated children of a single container or list node.
fn check_children(dnode: &DataNodeRef<'_>, errors: &mut Vec<RpcError>) {
    for schild in dnode.schema().children() {
        if errors.len() >= MAX_ERRORS {
            return;
        }
        if !schild.is_config() || !schild.is_mandatory() {
            continue;
        }
        match schild.kind() {
            SchemaNodeKind::Leaf => {
                if !has_data_child(dnode, &schild) {
                    let path =
                        format!("{}/{}", dnode.path(), schild.name());
                    errors.push(
                        RpcError::data_missing(format!(
                            "Mandatory node \"{}\" is not present",
                            schild.name()
                        ))
                        .with_path(path),
                    );
                }
            }
            SchemaNodeKind::Choice => {
                if !choice_satisfied(dnode, &schild) {
                    errors.push(
                        RpcError::operation_failed(
                            ErrorType::Application,
                            format!(
                                "Mandatory choice \"{}\" has no case \
                                 present",
                                schild.name()
                            ),
                        )
                        .with_app_tag("missing-choice")
                        .with_path(dnode.path())
                        .with_info(ErrorInfo::MissingChoice(
                            schild.name().to_owned(),
                        )),
                    );
                }
            }
            _ => (),
        }
    }
}

fn has_data_child(dnode: &DataNodeRef<'_>, schild: &SchemaNode<'_>) -> bool {
    dnode.children().any(|child| {
        let snode = child.schema();
        snode.name() == schild.name()
            && snode.module().name() == schild.module().name()
    })
}

// A mandatory choice is satisfied when any member of any of its cases is
// instantiated under the parent node.
fn choice_satisfied(
    dnode: &DataNodeRef<'_>,
    choice: &SchemaNode<'_>,
) -> bool {
    for case in choice.children() {
        for member in case.children() {
            if has_data_child(dnode, &member) {
                return true;
            }
        }
    }
    false
}

// Maps a libyang validation failure onto the NETCONF error taxonomy. The
// standard YANG error-app-tags of RFC 7950, section 15 are preserved.
fn map_validation_error(error: &yang3::Error) -> RpcError {
    let message = error
        .msg
        .clone()
        .unwrap_or_else(|| "validation failed".to_owned());
    let path = error.path.clone().unwrap_or_default();

    let rpc_error = match error.apptag.as_deref() {
        Some("too-many-elements") => {
            RpcError::too_many_elements(path.clone())
        }
        Some("too-few-elements") => RpcError::too_few_elements(path.clone()),
        Some("data-not-unique") => {
            RpcError::data_not_unique(quoted_paths(&message))
        }
        Some("missing-choice") => RpcError::operation_failed(
            ErrorType::Application,
            message.clone(),
        )
        .with_app_tag("missing-choice")
        .with_info(ErrorInfo::MissingChoice(
            element_in_quotes(&message).unwrap_or_default(),
        )),
        Some("instance-required") | Some("missing-instance") => {
            RpcError::data_missing(message.clone())
        }
        Some(app_tag) => {
            // XPath-defined error-app-tag (must statements and friends).
            RpcError::operation_failed(ErrorType::Application, message.clone())
                .with_app_tag(app_tag)
        }
        None if message.contains("Mandatory") => {
            RpcError::data_missing(message.clone())
        }
        None => {
            RpcError::invalid_value(ErrorType::Application, message.clone())
        }
    };

    let rpc_error = if rpc_error.path.is_none() && !path.is_empty() {
        rpc_error.with_path(path)
    } else {
        rpc_error
    };
    rpc_error.with_message(message)
}

// Extracts the double-quoted data paths embedded in a libyang diagnostic.
fn quoted_paths(message: &str) -> Vec<String> {
    message
        .split('"')
        .skip(1)
        .step_by(2)
        .filter(|chunk| chunk.starts_with('/'))
        .map(str::to_owned)
        .collect()
}

// Extracts the first double-quoted token of a libyang diagnostic.
fn element_in_quotes(message: &str) -> Option<String> {
    message.split('"').nth(1).map(str::to_owned)
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use lattice_northbound::rpc_error::ErrorInfo;

    use super::*;
    use crate::northbound::tests::{context_init, parse_config};

    #[test]
    fn valid_configuration_passes() {
        context_init();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<hostname>rtr0</hostname>",
            "<dns-server><name>a</name><address>192.0.2.1</address>",
            "</dns-server>",
            "</system>"
        ));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn missing_mandatory_leaf() {
        context_init();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<dns-server><name>a</name></dns-server>",
            "</system>"
        ));
        let errors = validate(&config).unwrap_err();
        let error = &errors[0];
        assert_eq!(error.tag, ErrorTag::DataMissing);
        assert!(error.path.as_deref().unwrap().contains("address"));
    }

    #[test]
    fn missing_mandatory_choice() {
        context_init();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<user><name>alice</name></user>",
            "</system>"
        ));
        let errors = validate(&config).unwrap_err();
        let error = &errors[0];
        assert_eq!(error.tag, ErrorTag::OperationFailed);
        assert_eq!(error.app_tag.as_deref(), Some("missing-choice"));
        assert!(error.info.iter().any(|info| matches!(
            info,
            ErrorInfo::MissingChoice(name) if name == "auth-method"
        )));
    }

    #[test]
    fn unique_violation_reports_siblings() {
        context_init();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<dns-server><name>a</name><address>192.0.2.1</address>",
            "</dns-server>",
            "<dns-server><name>b</name><address>192.0.2.1</address>",
            "</dns-server>",
            "</system>"
        ));
        let errors = validate(&config).unwrap_err();
        let error = errors
            .iter()
            .find(|error| {
                error.app_tag.as_deref() == Some("data-not-unique")
                    || error.tag == ErrorTag::DataNotUnique
            })
            .expect("expected a data-not-unique error");
        let (tag, app_tag) = error.tag.wire_tag();
        assert_eq!(tag, "operation-failed");
        assert_eq!(
            error.app_tag.as_deref().or(app_tag),
            Some("data-not-unique")
        );
    }

    #[test]
    fn too_many_list_entries() {
        context_init();
        let mut servers = String::new();
        for i in 0..5 {
            servers.push_str(&format!(
                "<dns-server><name>s{i}</name>\
                 <address>192.0.2.{i}</address></dns-server>"
            ));
        }
        let config = parse_config(&format!(
            "<system xmlns=\"urn:lattice:system\">{servers}</system>"
        ));
        let errors = validate(&config).unwrap_err();
        let error = errors
            .iter()
            .find(|error| error.tag == ErrorTag::TooManyElements)
            .expect("expected a too-many-elements error");
        assert_eq!(error.tag.wire_tag().1, Some("too-many-elements"));
    }

    #[test]
    fn multiple_errors_in_document_order() {
        context_init();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<dns-server><name>a</name></dns-server>",
            "<user><name>alice</name></user>",
            "</system>"
        ));
        let errors = validate(&config).unwrap_err();
        assert!(errors.len() >= 2);
        // dns-server precedes user in document order.
        assert_eq!(errors[0].tag, ErrorTag::DataMissing);
        assert_eq!(errors[1].app_tag.as_deref(), Some("missing-choice"));
    }
}
