//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! RFC 6241 error encoder.
//!
//! The canonical representation of every protocol error is an in-memory
//! element tree ([`XmlNode`]); the serialized form is that tree rendered
//! through a single writer, which also takes care of XML character escaping
//! of all user-supplied text.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use yang3::data::DataTree;

/// The base NETCONF namespace.
pub const NS_NETCONF: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// NETCONF error type (RFC 6241, section 4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// NETCONF error tag (RFC 6241, Appendix A), extended with the YANG
/// validation tags of RFC 7950, section 15.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
    DataNotUnique,
    TooManyElements,
    TooFewElements,
}

/// Structured contents of the `error-info` element.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorInfo {
    BadAttribute(String),
    BadElement(String),
    BadNamespace(String),
    SessionId(u32),
    NonUnique(String),
    MissingChoice(String),
}

/// A single `rpc-error` element in structured form.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RpcError {
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub app_tag: Option<String>,
    pub path: Option<String>,
    pub message: Option<String>,
    pub info: Vec<ErrorInfo>,
}

/// In-memory XML element, the canonical error representation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

/// Outcome of [`merge_or_error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    Ok,
    Recovered,
    Fatal,
}

// ===== impl ErrorType =====

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl ErrorTag =====

impl ErrorTag {
    // The `error-tag` and implied `error-app-tag` emitted on the wire. The
    // YANG validation tags are not NETCONF error tags of their own; they
    // ride on `operation-failed` as application tags.
    pub fn wire_tag(&self) -> (&'static str, Option<&'static str>) {
        match self {
            ErrorTag::InUse => ("in-use", None),
            ErrorTag::InvalidValue => ("invalid-value", None),
            ErrorTag::TooBig => ("too-big", None),
            ErrorTag::MissingAttribute => ("missing-attribute", None),
            ErrorTag::BadAttribute => ("bad-attribute", None),
            ErrorTag::UnknownAttribute => ("unknown-attribute", None),
            ErrorTag::MissingElement => ("missing-element", None),
            ErrorTag::BadElement => ("bad-element", None),
            ErrorTag::UnknownElement => ("unknown-element", None),
            ErrorTag::UnknownNamespace => ("unknown-namespace", None),
            ErrorTag::AccessDenied => ("access-denied", None),
            ErrorTag::LockDenied => ("lock-denied", None),
            ErrorTag::ResourceDenied => ("resource-denied", None),
            ErrorTag::RollbackFailed => ("rollback-failed", None),
            ErrorTag::DataExists => ("data-exists", None),
            ErrorTag::DataMissing => ("data-missing", None),
            ErrorTag::OperationNotSupported => {
                ("operation-not-supported", None)
            }
            ErrorTag::OperationFailed => ("operation-failed", None),
            ErrorTag::MalformedMessage => ("malformed-message", None),
            ErrorTag::DataNotUnique => {
                ("operation-failed", Some("data-not-unique"))
            }
            ErrorTag::TooManyElements => {
                ("operation-failed", Some("too-many-elements"))
            }
            ErrorTag::TooFewElements => {
                ("operation-failed", Some("too-few-elements"))
            }
        }
    }
}

// ===== impl RpcError =====

impl RpcError {
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> RpcError {
        // A few tags mandate a fixed error type regardless of the caller.
        let error_type = match tag {
            ErrorTag::LockDenied => ErrorType::Protocol,
            ErrorTag::MalformedMessage => ErrorType::Rpc,
            ErrorTag::DataExists => ErrorType::Application,
            _ => error_type,
        };

        RpcError {
            error_type,
            tag,
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_app_tag(mut self, app_tag: impl Into<String>) -> Self {
        self.app_tag = Some(app_tag.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: ErrorInfo) -> Self {
        self.info.push(info);
        self
    }

    pub fn in_use(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::InUse).with_message(message)
    }

    pub fn invalid_value(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::InvalidValue).with_message(message)
    }

    pub fn too_big(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::TooBig).with_message(message)
    }

    pub fn missing_attribute(
        error_type: ErrorType,
        attribute: impl Into<String>,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::MissingAttribute)
            .with_info(ErrorInfo::BadAttribute(attribute.into()))
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn bad_attribute(
        error_type: ErrorType,
        attribute: impl Into<String>,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::BadAttribute)
            .with_info(ErrorInfo::BadAttribute(attribute.into()))
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn unknown_attribute(
        error_type: ErrorType,
        attribute: impl Into<String>,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::UnknownAttribute)
            .with_info(ErrorInfo::BadAttribute(attribute.into()))
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn missing_element(
        error_type: ErrorType,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::MissingElement)
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn bad_element(
        error_type: ErrorType,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::BadElement)
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn unknown_element(
        error_type: ErrorType,
        element: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::UnknownElement)
            .with_info(ErrorInfo::BadElement(element.into()))
    }

    pub fn unknown_namespace(
        error_type: ErrorType,
        element: impl Into<String>,
        namespace: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::UnknownNamespace)
            .with_info(ErrorInfo::BadElement(element.into()))
            .with_info(ErrorInfo::BadNamespace(namespace.into()))
    }

    pub fn access_denied(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::AccessDenied).with_message(message)
    }

    // Always `protocol`; carries the holder's session-id in `error-info`.
    pub fn lock_denied(session_id: u32) -> RpcError {
        RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_info(ErrorInfo::SessionId(session_id))
            .with_message("Lock failed; lock is already held")
    }

    pub fn resource_denied(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::ResourceDenied)
            .with_message(message)
    }

    pub fn rollback_failed(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::RollbackFailed)
            .with_message(message)
    }

    // Always `application`.
    pub fn data_exists() -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::DataExists)
            .with_message("Data already exists; cannot create new resource")
    }

    pub fn data_missing(message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
            .with_message(message)
    }

    pub fn operation_not_supported(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::OperationNotSupported)
            .with_message(message)
    }

    pub fn operation_failed(
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> RpcError {
        RpcError::new(error_type, ErrorTag::OperationFailed)
            .with_message(message)
    }

    // Always `rpc`.
    pub fn malformed_message(message: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
            .with_message(message)
    }

    // `error-info` lists the offending sibling paths.
    pub fn data_not_unique(
        non_unique: impl IntoIterator<Item = String>,
    ) -> RpcError {
        let mut error =
            RpcError::new(ErrorType::Application, ErrorTag::DataNotUnique);
        for path in non_unique {
            error.info.push(ErrorInfo::NonUnique(path));
        }
        error
    }

    pub fn too_many_elements(path: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::TooManyElements)
            .with_path(path)
    }

    pub fn too_few_elements(path: impl Into<String>) -> RpcError {
        RpcError::new(ErrorType::Application, ErrorTag::TooFewElements)
            .with_path(path)
    }

    /// Builds the canonical `rpc-error` element tree.
    pub fn to_node(&self) -> XmlNode {
        let (tag, implied_app_tag) = self.tag.wire_tag();
        let app_tag = self
            .app_tag
            .as_deref()
            .or(implied_app_tag)
            .map(str::to_owned);

        let mut node = XmlNode::new("rpc-error");
        node.children
            .push(XmlNode::with_text("error-type", self.error_type.as_str()));
        node.children.push(XmlNode::with_text("error-tag", tag));
        node.children
            .push(XmlNode::with_text("error-severity", "error"));
        if let Some(app_tag) = app_tag {
            node.children
                .push(XmlNode::with_text("error-app-tag", app_tag));
        }
        if let Some(path) = &self.path {
            node.children.push(XmlNode::with_text("error-path", path));
        }
        if !self.info.is_empty() {
            let mut info = XmlNode::new("error-info");
            for entry in &self.info {
                info.children.push(entry.to_node());
            }
            node.children.push(info);
        }
        if let Some(message) = &self.message {
            let mut msg = XmlNode::with_text("error-message", message);
            msg.attrs.push(("xml:lang".to_owned(), "en".to_owned()));
            node.children.push(msg);
        }
        node
    }

    /// Renders the error as a standalone `rpc-error` element.
    pub fn to_xml(&self) -> String {
        self.to_node().render()
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (tag, _) = self.tag.wire_tag();
        write!(f, "{}", tag)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

// ===== impl ErrorInfo =====

impl ErrorInfo {
    fn to_node(&self) -> XmlNode {
        match self {
            ErrorInfo::BadAttribute(name) => {
                XmlNode::with_text("bad-attribute", name)
            }
            ErrorInfo::BadElement(name) => {
                XmlNode::with_text("bad-element", name)
            }
            ErrorInfo::BadNamespace(name) => {
                XmlNode::with_text("bad-namespace", name)
            }
            ErrorInfo::SessionId(id) => {
                XmlNode::with_text("session-id", id.to_string())
            }
            ErrorInfo::NonUnique(path) => {
                XmlNode::with_text("non-unique", path)
            }
            ErrorInfo::MissingChoice(name) => {
                XmlNode::with_text("missing-choice", name)
            }
        }
    }
}

// ===== impl XmlNode =====

impl XmlNode {
    pub fn new(name: impl Into<String>) -> XmlNode {
        XmlNode {
            name: name.into(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_text(
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> XmlNode {
        XmlNode {
            name: name.into(),
            attrs: Vec::new(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    /// Renders the element tree, escaping all text and attribute values.
    pub fn render(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        self.write(&mut writer);
        String::from_utf8(writer.into_inner())
            .expect("rendered XML is valid UTF-8")
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) {
        let mut start = BytesStart::new(self.name.as_str());
        for (name, value) in &self.attrs {
            start.push_attribute((name.as_str(), value.as_str()));
        }

        if self.text.is_none() && self.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .expect("failed to render error element");
            return;
        }

        writer
            .write_event(Event::Start(start))
            .expect("failed to render error element");
        if let Some(text) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .expect("failed to render error text");
        }
        for child in &self.children {
            child.write(writer);
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .expect("failed to render error element");
    }
}

// ===== global functions =====

/// Builds an `rpc-reply` envelope carrying one or more errors.
pub fn rpc_reply_error(errors: &[RpcError]) -> XmlNode {
    let mut reply = XmlNode::new("rpc-reply");
    reply
        .attrs
        .push(("xmlns".to_owned(), NS_NETCONF.to_owned()));
    for error in errors {
        reply.children.push(error.to_node());
    }
    reply
}

/// Builds an `<rpc-reply><ok/></rpc-reply>` envelope.
pub fn rpc_reply_ok() -> XmlNode {
    let mut reply = XmlNode::new("rpc-reply");
    reply
        .attrs
        .push(("xmlns".to_owned(), NS_NETCONF.to_owned()));
    reply.children.push(XmlNode::new("ok"));
    reply
}

/// Merges `source` into `target`. When the merge fails, the offending
/// subtree is trimmed from the target and an `operation-failed` error is
/// installed on the caller's output list.
pub fn merge_or_error(
    target: &mut DataTree<'static>,
    source: &DataTree<'static>,
    errors: &mut Vec<RpcError>,
) -> MergeOutcome {
    if let Err(error) = target.merge(source) {
        let message = error
            .msg
            .clone()
            .unwrap_or_else(|| "failed to merge data trees".to_owned());
        if let Some(path) = &error.path {
            if target.remove(path).is_ok() {
                errors.push(
                    RpcError::operation_failed(ErrorType::Application, message)
                        .with_path(path),
                );
                return MergeOutcome::Recovered;
            }
        }
        errors.push(RpcError::operation_failed(
            ErrorType::Application,
            message,
        ));
        return MergeOutcome::Fatal;
    }

    MergeOutcome::Ok
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope() {
        assert_eq!(
            rpc_reply_ok().render(),
            "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
             <ok/></rpc-reply>"
        );
    }

    #[test]
    fn lock_denied_is_protocol_with_session_id() {
        let error = RpcError::lock_denied(84);
        assert_eq!(error.error_type, ErrorType::Protocol);
        assert_eq!(
            error.to_xml(),
            "<rpc-error>\
             <error-type>protocol</error-type>\
             <error-tag>lock-denied</error-tag>\
             <error-severity>error</error-severity>\
             <error-info><session-id>84</session-id></error-info>\
             <error-message xml:lang=\"en\">\
             Lock failed; lock is already held</error-message>\
             </rpc-error>"
        );
    }

    #[test]
    fn fixed_error_types_win_over_caller() {
        let error =
            RpcError::new(ErrorType::Application, ErrorTag::MalformedMessage);
        assert_eq!(error.error_type, ErrorType::Rpc);

        let error = RpcError::new(ErrorType::Rpc, ErrorTag::DataExists);
        assert_eq!(error.error_type, ErrorType::Application);
    }

    #[test]
    fn message_is_escaped() {
        let error = RpcError::operation_failed(
            ErrorType::Application,
            "fail <now> & forever",
        );
        let xml = error.to_xml();
        assert!(xml.contains("fail &lt;now&gt; &amp; forever"));
        assert!(!xml.contains("<now>"));
    }

    #[test]
    fn data_not_unique_lists_sibling_paths() {
        let error = RpcError::data_not_unique(vec![
            "/lattice-system:system/dns-server[name='a']".to_owned(),
            "/lattice-system:system/dns-server[name='b']".to_owned(),
        ]);
        let xml = error.to_xml();
        assert!(xml.contains("<error-tag>operation-failed</error-tag>"));
        assert!(xml.contains("<error-app-tag>data-not-unique</error-app-tag>"));
        assert!(xml.contains(
            "<non-unique>/lattice-system:system/dns-server[name=&apos;a&apos;]\
             </non-unique>"
        ));
        assert!(xml.contains(
            "<non-unique>/lattice-system:system/dns-server[name=&apos;b&apos;]\
             </non-unique>"
        ));
    }

    #[test]
    fn too_few_elements_names_the_list() {
        let error =
            RpcError::too_few_elements("/lattice-system:system/dns-server");
        let xml = error.to_xml();
        assert!(xml.contains("<error-tag>operation-failed</error-tag>"));
        assert!(
            xml.contains("<error-app-tag>too-few-elements</error-app-tag>")
        );
        assert!(xml.contains(
            "<error-path>/lattice-system:system/dns-server</error-path>"
        ));
    }

    #[test]
    fn unknown_namespace_info_entries() {
        let error = RpcError::unknown_namespace(
            ErrorType::Application,
            "x",
            "urn:example:wrong",
        );
        let xml = error.to_xml();
        assert!(xml.contains("<bad-element>x</bad-element>"));
        assert!(
            xml.contains("<bad-namespace>urn:example:wrong</bad-namespace>")
        );
    }

    #[test]
    fn every_tag_renders_an_envelope() {
        let tags = [
            ErrorTag::InUse,
            ErrorTag::InvalidValue,
            ErrorTag::TooBig,
            ErrorTag::MissingAttribute,
            ErrorTag::BadAttribute,
            ErrorTag::UnknownAttribute,
            ErrorTag::MissingElement,
            ErrorTag::BadElement,
            ErrorTag::UnknownElement,
            ErrorTag::UnknownNamespace,
            ErrorTag::AccessDenied,
            ErrorTag::LockDenied,
            ErrorTag::ResourceDenied,
            ErrorTag::RollbackFailed,
            ErrorTag::DataExists,
            ErrorTag::DataMissing,
            ErrorTag::OperationNotSupported,
            ErrorTag::OperationFailed,
            ErrorTag::MalformedMessage,
            ErrorTag::DataNotUnique,
            ErrorTag::TooManyElements,
            ErrorTag::TooFewElements,
        ];
        for tag in tags {
            let error = RpcError::new(ErrorType::Application, tag);
            let xml = rpc_reply_error(&[error]).render();
            assert!(xml.starts_with(
                "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">"
            ));
            assert!(xml.contains("<error-severity>error</error-severity>"));
            assert!(xml.ends_with("</rpc-reply>"));
        }
    }
}
