//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF session transport.
//!
//! Listens on a Unix or TCP socket, speaks RFC 6242 framing (end-of-message
//! for base:1.0, chunked after a base:1.1 hello), and relays parsed protocol
//! operations into the northbound event loop. One task per session; the
//! session's NACM principal is derived from the socket peer credentials.

use std::collections::BTreeSet;
use std::ffi::CString;

use lattice_northbound::rpc_error::{
    ErrorType, NS_NETCONF, RpcError, XmlNode, rpc_reply_error, rpc_reply_ok,
};
use lattice_utils::Sender;
use lattice_utils::task::Task;
use nix::unistd::{Gid, Group, Uid, User};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use yang3::data::{Data, DataFormat, DataPrinterFlags};

use crate::config::{Listen, ListenFamily, NacmCredentials};
use crate::northbound::client::api::{
    self as capi, ErrorOption, Operation, TestOption,
};
use crate::northbound::datastore::{DatastoreId, EditOperation};

// Largest accepted message, in bytes.
const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

// End-of-message delimiter (base:1.0 framing).
const EOM: &[u8] = b"]]>]]>";

// Capabilities advertised in the server hello.
const CAPABILITIES: &[&str] = &[
    "urn:ietf:params:netconf:base:1.0",
    "urn:ietf:params:netconf:base:1.1",
    "urn:ietf:params:netconf:capability:candidate:1.0",
    "urn:ietf:params:netconf:capability:confirmed-commit:1.1",
    "urn:ietf:params:netconf:capability:validate:1.1",
    "urn:ietf:params:netconf:capability:rollback-on-error:1.0",
    "urn:ietf:params:netconf:capability:startup:1.0",
    "urn:ietf:params:netconf:capability:xpath:1.0",
];

// The authenticated transport principal of a session.
#[derive(Clone, Debug)]
struct Principal {
    username: String,
    groups: BTreeSet<String>,
    recovery: bool,
}

// Result of reading one framed message.
#[derive(Debug)]
enum ReadOutcome {
    Message(String),
    TooBig,
    Invalid,
    Closed,
}

// ===== global functions =====

pub(crate) fn start(
    config: &Listen,
    credentials: NacmCredentials,
    request_tx: Sender<capi::client::Request>,
) -> Task<()> {
    let config = config.clone();
    Task::spawn(async move {
        match config.family {
            ListenFamily::Unix => serve_unix(config, credentials, request_tx).await,
            ListenFamily::Ipv4 | ListenFamily::Ipv6 => {
                serve_tcp(config, request_tx).await
            }
        }
    })
}

async fn serve_unix(
    config: Listen,
    credentials: NacmCredentials,
    request_tx: Sender<capi::client::Request>,
) {
    // Remove a stale socket left behind by an unclean shutdown.
    let _ = std::fs::remove_file(&config.address);
    let listener = match UnixListener::bind(&config.address) {
        Ok(listener) => listener,
        Err(error) => {
            error!(address = %config.address, %error, "failed to bind NETCONF socket");
            return;
        }
    };
    info!(address = %config.address, "listening for NETCONF sessions");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let cred = match stream.peer_cred() {
                    Ok(cred) => cred,
                    Err(error) => {
                        warn!(%error, "failed to read peer credentials");
                        continue;
                    }
                };
                let principal = resolve_principal(cred.uid(), credentials);
                if !group_allowed(&principal, config.group.as_deref()) {
                    warn!(username = %principal.username,
                        "connection rejected: peer not in the required group");
                    continue;
                }
                let request_tx = request_tx.clone();
                let mut task = Task::spawn(async move {
                    handle_session(stream, principal, request_tx).await;
                });
                task.detach();
            }
            Err(error) => warn!(%error, "failed to accept connection"),
        }
    }
}

async fn serve_tcp(config: Listen, request_tx: Sender<capi::client::Request>) {
    let listener = match TcpListener::bind(&config.address).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(address = %config.address, %error, "failed to bind NETCONF socket");
            return;
        }
    };
    info!(address = %config.address, "listening for NETCONF sessions");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                // TCP carries no peer credentials.
                let principal = Principal {
                    username: "anonymous".to_owned(),
                    groups: BTreeSet::new(),
                    recovery: false,
                };
                let request_tx = request_tx.clone();
                let mut task = Task::spawn(async move {
                    handle_session(stream, principal, request_tx).await;
                });
                task.detach();
            }
            Err(error) => warn!(%error, "failed to accept connection"),
        }
    }
}

// Per-session task: hello exchange followed by the request/reply loop.
async fn handle_session<S>(
    stream: S,
    principal: Principal,
    request_tx: Sender<capi::client::Request>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Attach the session to the northbound.
    let (kill_tx, mut kill_rx) = mpsc::unbounded_channel();
    let (responder_tx, responder_rx) = oneshot::channel();
    let request =
        capi::client::Request::Attach(capi::client::AttachRequest {
            username: principal.username.clone(),
            groups: principal.groups.clone(),
            recovery: principal.recovery,
            kill_tx,
            responder: responder_tx,
        });
    if request_tx.send(request).await.is_err() {
        return;
    }
    let session_id = match responder_rx.await {
        Ok(response) => response.session_id,
        Err(_) => return,
    };
    debug!(%session_id, username = %principal.username, "NETCONF session established");

    // Hello exchange. The hello itself is always end-of-message framed.
    let hello = hello_message(session_id);
    if writer.write_all(&eom_frame(&hello)).await.is_err() {
        let _ = detach(&request_tx, session_id).await;
        return;
    }
    let mut buf = Vec::new();
    let base11 = match read_message(&mut reader, &mut buf, false).await {
        Ok(ReadOutcome::Message(msg)) => match parse_hello(&msg) {
            Ok(base11) => base11,
            Err(error) => {
                warn!(%session_id, %error, "invalid hello message");
                let _ = detach(&request_tx, session_id).await;
                return;
            }
        },
        _ => {
            let _ = detach(&request_tx, session_id).await;
            return;
        }
    };

    // Request/reply loop. Exactly one rpc-reply per rpc.
    loop {
        tokio::select! {
            Some(_) = kill_rx.recv() => break,
            outcome = read_message(&mut reader, &mut buf, base11) => {
                match outcome {
                    Ok(ReadOutcome::Message(msg)) => {
                        let (reply, close) =
                            process_message(session_id, &msg, &request_tx)
                                .await;
                        let frame = match base11 {
                            true => chunked_frame(&reply),
                            false => eom_frame(&reply),
                        };
                        if writer.write_all(&frame).await.is_err() {
                            break;
                        }
                        if close {
                            break;
                        }
                    }
                    Ok(ReadOutcome::TooBig) => {
                        let error = RpcError::too_big(
                            ErrorType::Rpc,
                            "message exceeds the maximum accepted size",
                        );
                        let reply = reply_error(None, &[error]);
                        let frame = match base11 {
                            true => chunked_frame(&reply),
                            false => eom_frame(&reply),
                        };
                        let _ = writer.write_all(&frame).await;
                        break;
                    }
                    Ok(ReadOutcome::Invalid) => {
                        let error = RpcError::malformed_message(
                            "invalid message framing",
                        );
                        let reply = reply_error(None, &[error]);
                        let frame = match base11 {
                            true => chunked_frame(&reply),
                            false => eom_frame(&reply),
                        };
                        let _ = writer.write_all(&frame).await;
                        break;
                    }
                    Ok(ReadOutcome::Closed) | Err(_) => break,
                }
            }
        }
    }

    let _ = detach(&request_tx, session_id).await;
    debug!(%session_id, "NETCONF session closed");
}

async fn detach(
    request_tx: &Sender<capi::client::Request>,
    session_id: u32,
) -> Result<(), mpsc::error::SendError<capi::client::Request>> {
    request_tx
        .send(capi::client::Request::Detach(capi::client::DetachRequest {
            session_id,
        }))
        .await
}

// Parses one message, relays it to the northbound and renders the reply.
async fn process_message(
    session_id: u32,
    msg: &str,
    request_tx: &Sender<capi::client::Request>,
) -> (String, bool) {
    let (message_id, operation) = match parse_rpc(msg) {
        Ok(parsed) => parsed,
        Err(error) => return (reply_error(None, &[error]), false),
    };
    let close = matches!(operation, Operation::CloseSession);

    let (responder_tx, responder_rx) = oneshot::channel();
    let request = capi::client::Request::Rpc(capi::client::RpcRequest {
        session_id,
        operation,
        responder: responder_tx,
    });
    if request_tx.send(request).await.is_err() {
        let error = RpcError::operation_failed(
            ErrorType::Application,
            "the backend is shutting down",
        );
        return (reply_error(message_id.as_deref(), &[error]), true);
    }

    let reply = match responder_rx.await {
        Ok(Ok(capi::client::Reply::Ok)) => reply_ok(message_id.as_deref()),
        Ok(Ok(capi::client::Reply::Data(dtree))) => {
            let data = dtree
                .print_string(
                    DataFormat::XML,
                    DataPrinterFlags::WITH_SIBLINGS
                        | DataPrinterFlags::SHRINK,
                )
                .ok();
            reply_data(message_id.as_deref(), data.as_deref())
        }
        Ok(Err(errors)) => reply_error(message_id.as_deref(), &errors),
        Err(_) => {
            let error = RpcError::operation_failed(
                ErrorType::Application,
                "no response from the backend",
            );
            reply_error(message_id.as_deref(), &[error])
        }
    };
    (reply, close)
}

// ===== principal resolution =====

fn resolve_principal(uid: u32, credentials: NacmCredentials) -> Principal {
    if credentials == NacmCredentials::None {
        return Principal {
            username: "anonymous".to_owned(),
            groups: BTreeSet::new(),
            recovery: false,
        };
    }

    let recovery = credentials == NacmCredentials::Except && uid == 0;
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => Principal {
            groups: user_groups(&user),
            username: user.name,
            recovery,
        },
        _ => Principal {
            username: format!("uid{uid}"),
            groups: BTreeSet::new(),
            recovery,
        },
    }
}

fn user_groups(user: &User) -> BTreeSet<String> {
    let name = match CString::new(user.name.as_bytes()) {
        Ok(name) => name,
        Err(_) => return BTreeSet::new(),
    };
    nix::unistd::getgrouplist(&name, user.gid)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|gid: Gid| Group::from_gid(gid).ok().flatten())
        .map(|group| group.name)
        .collect()
}

fn group_allowed(principal: &Principal, required: Option<&str>) -> bool {
    match required {
        Some(group) => {
            principal.recovery || principal.groups.contains(group)
        }
        None => true,
    }
}

// ===== message framing =====

fn eom_frame(msg: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(msg.len() + EOM.len() + 1);
    frame.extend_from_slice(msg.as_bytes());
    frame.extend_from_slice(b"\n");
    frame.extend_from_slice(EOM);
    frame
}

fn chunked_frame(msg: &str) -> Vec<u8> {
    format!("\n#{}\n{}\n##\n", msg.len(), msg).into_bytes()
}

// Extracts one end-of-message framed message from the buffer.
fn extract_eom(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.windows(EOM.len()).position(|window| window == EOM)?;
    let msg = String::from_utf8_lossy(&buf[..pos]).trim().to_owned();
    buf.drain(..pos + EOM.len());
    Some(msg)
}

// Extracts one chunk-framed message from the buffer. `Ok(None)` means more
// data is needed.
fn extract_chunked(
    buf: &mut Vec<u8>,
) -> std::result::Result<Option<String>, ()> {
    let mut pos = 0;
    let mut msg = Vec::new();

    loop {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        if &buf[pos..pos + 2] != b"\n#" {
            return Err(());
        }
        pos += 2;

        // End-of-chunks marker.
        if buf.get(pos) == Some(&b'#') {
            match buf.get(pos + 1) {
                Some(&b'\n') => {
                    buf.drain(..pos + 2);
                    return match String::from_utf8(msg) {
                        Ok(msg) => Ok(Some(msg)),
                        Err(_) => Err(()),
                    };
                }
                Some(_) => return Err(()),
                None => return Ok(None),
            }
        }

        // Chunk size line.
        let newline =
            match buf[pos..].iter().position(|&byte| byte == b'\n') {
                Some(newline) => newline,
                None => return Ok(None),
            };
        let size: usize = match std::str::from_utf8(&buf[pos..pos + newline])
            .ok()
            .and_then(|digits| digits.parse().ok())
        {
            Some(size) if size > 0 => size,
            _ => return Err(()),
        };
        pos += newline + 1;

        if buf.len() < pos + size {
            return Ok(None);
        }
        msg.extend_from_slice(&buf[pos..pos + size]);
        pos += size;
    }
}

async fn read_message<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    base11: bool,
) -> std::io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    loop {
        if base11 {
            match extract_chunked(buf) {
                Ok(Some(msg)) => return Ok(ReadOutcome::Message(msg)),
                Ok(None) => (),
                Err(()) => return Ok(ReadOutcome::Invalid),
            }
        } else if let Some(msg) = extract_eom(buf) {
            return Ok(ReadOutcome::Message(msg));
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            return Ok(ReadOutcome::TooBig);
        }

        let mut chunk = [0u8; 4096];
        let count = reader.read(&mut chunk).await?;
        if count == 0 {
            return Ok(ReadOutcome::Closed);
        }
        buf.extend_from_slice(&chunk[..count]);
    }
}

// ===== hello handling =====

fn hello_message(session_id: u32) -> String {
    let mut hello = XmlNode::new("hello");
    hello
        .attrs
        .push(("xmlns".to_owned(), NS_NETCONF.to_owned()));
    let mut capabilities = XmlNode::new("capabilities");
    for capability in CAPABILITIES {
        capabilities
            .children
            .push(XmlNode::with_text("capability", *capability));
    }
    hello.children.push(capabilities);
    hello
        .children
        .push(XmlNode::with_text("session-id", session_id.to_string()));
    hello.render()
}

// Returns whether the peer supports base:1.1 (chunked framing).
fn parse_hello(msg: &str) -> std::result::Result<bool, RpcError> {
    let root = parse_xml(msg)?;
    if local_name(&root.name) != "hello" {
        return Err(RpcError::malformed_message("expected a hello message"));
    }
    let base11 = child(&root, "capabilities")
        .map(|capabilities| {
            capabilities.children.iter().any(|capability| {
                capability.text.as_deref().map(str::trim)
                    == Some("urn:ietf:params:netconf:base:1.1")
            })
        })
        .unwrap_or(false);
    Ok(base11)
}

// ===== reply rendering =====

fn with_message_id(mut node: XmlNode, message_id: Option<&str>) -> XmlNode {
    if let Some(message_id) = message_id {
        node.attrs
            .push(("message-id".to_owned(), message_id.to_owned()));
    }
    node
}

fn reply_ok(message_id: Option<&str>) -> String {
    with_message_id(rpc_reply_ok(), message_id).render()
}

fn reply_error(message_id: Option<&str>, errors: &[RpcError]) -> String {
    with_message_id(rpc_reply_error(errors), message_id).render()
}

fn reply_data(message_id: Option<&str>, data: Option<&str>) -> String {
    let message_id = match message_id {
        Some(message_id) => format!(
            " message-id=\"{}\"",
            quick_xml::escape::escape(message_id)
        ),
        None => String::new(),
    };
    match data {
        Some(data) if !data.is_empty() => format!(
            "<rpc-reply xmlns=\"{NS_NETCONF}\"{message_id}>\
             <data>{data}</data></rpc-reply>"
        ),
        _ => format!(
            "<rpc-reply xmlns=\"{NS_NETCONF}\"{message_id}><data/>\
             </rpc-reply>"
        ),
    }
}

// ===== rpc parsing =====

// Parses an `<rpc>` envelope into a protocol operation.
fn parse_rpc(
    msg: &str,
) -> std::result::Result<(Option<String>, Operation), RpcError> {
    let root = parse_xml(msg)?;
    if local_name(&root.name) != "rpc" {
        return Err(RpcError::malformed_message("expected an rpc element"));
    }
    let message_id = root
        .attrs
        .iter()
        .find(|(name, _)| name == "message-id")
        .map(|(_, value)| value.clone());

    let op_node = root.children.first().ok_or_else(|| {
        RpcError::missing_element(ErrorType::Rpc, "operation")
    })?;

    let operation = match local_name(&op_node.name) {
        "get" => Operation::Get {
            filter: parse_filter(op_node)?,
        },
        "get-config" => Operation::GetConfig {
            source: parse_store(op_node, "source")?,
            filter: parse_filter(op_node)?,
        },
        "edit-config" => parse_edit_config(op_node)?,
        "copy-config" => Operation::CopyConfig {
            source: parse_store(op_node, "source")?,
            target: parse_store(op_node, "target")?,
        },
        "delete-config" => Operation::DeleteConfig {
            target: parse_store(op_node, "target")?,
        },
        "lock" => Operation::Lock {
            target: parse_store(op_node, "target")?,
        },
        "unlock" => Operation::Unlock {
            target: parse_store(op_node, "target")?,
        },
        "commit" => Operation::Commit {
            confirmed: child(op_node, "confirmed").is_some(),
            confirm_timeout: child_text(op_node, "confirm-timeout")
                .map(|timeout| {
                    timeout.parse().map_err(|_| {
                        RpcError::invalid_value(
                            ErrorType::Protocol,
                            "invalid confirm-timeout",
                        )
                    })
                })
                .transpose()?,
            persist: child_text(op_node, "persist"),
            persist_id: child_text(op_node, "persist-id"),
        },
        "cancel-commit" => Operation::CancelCommit {
            persist_id: child_text(op_node, "persist-id"),
        },
        "discard-changes" => Operation::DiscardChanges,
        "validate" => Operation::Validate {
            source: parse_store(op_node, "source")?,
        },
        "close-session" => Operation::CloseSession,
        "kill-session" => Operation::KillSession {
            session_id: child_text(op_node, "session-id")
                .ok_or_else(|| {
                    RpcError::missing_element(ErrorType::Rpc, "session-id")
                })?
                .parse()
                .map_err(|_| {
                    RpcError::invalid_value(
                        ErrorType::Protocol,
                        "invalid session-id",
                    )
                })?,
        },
        name => {
            return Err(RpcError::operation_not_supported(
                ErrorType::Protocol,
                format!("unknown operation \"{name}\""),
            ));
        }
    };

    Ok((message_id, operation))
}

fn parse_edit_config(
    op_node: &XmlNode,
) -> std::result::Result<Operation, RpcError> {
    let target = parse_store(op_node, "target")?;
    let default_operation = match child_text(op_node, "default-operation") {
        Some(value) => value.parse::<EditOperation>().map_err(|()| {
            RpcError::invalid_value(
                ErrorType::Protocol,
                "invalid default-operation",
            )
        })?,
        None => EditOperation::Merge,
    };
    let test_option = match child_text(op_node, "test-option").as_deref() {
        Some("test-then-set") | None => TestOption::TestThenSet,
        Some("set") => TestOption::Set,
        Some("test-only") => TestOption::TestOnly,
        Some(_) => {
            return Err(RpcError::invalid_value(
                ErrorType::Protocol,
                "invalid test-option",
            ));
        }
    };
    let error_option = match child_text(op_node, "error-option").as_deref() {
        Some("stop-on-error") | None => ErrorOption::StopOnError,
        Some("continue-on-error") => ErrorOption::ContinueOnError,
        Some("rollback-on-error") => ErrorOption::RollbackOnError,
        Some(_) => {
            return Err(RpcError::invalid_value(
                ErrorType::Protocol,
                "invalid error-option",
            ));
        }
    };
    let config = child(op_node, "config").ok_or_else(|| {
        RpcError::missing_element(ErrorType::Rpc, "config")
    })?;
    let config = config
        .children
        .iter()
        .map(|child| child.render())
        .collect::<String>();

    Ok(Operation::EditConfig {
        target,
        default_operation,
        test_option,
        error_option,
        config,
    })
}

// Parses a `<source>`/`<target>` datastore selector.
fn parse_store(
    op_node: &XmlNode,
    name: &str,
) -> std::result::Result<DatastoreId, RpcError> {
    let store = child(op_node, name)
        .and_then(|node| node.children.first())
        .ok_or_else(|| RpcError::missing_element(ErrorType::Rpc, name))?;
    local_name(&store.name).parse().map_err(|()| {
        RpcError::operation_not_supported(
            ErrorType::Protocol,
            format!("unsupported {name} datastore \"{}\"", store.name),
        )
    })
}

// Only XPath filters (the `select` attribute) are supported.
fn parse_filter(
    op_node: &XmlNode,
) -> std::result::Result<Option<String>, RpcError> {
    match child(op_node, "filter") {
        Some(filter) => {
            match filter
                .attrs
                .iter()
                .find(|(name, _)| name == "select")
                .map(|(_, value)| value.clone())
            {
                Some(select) => Ok(Some(select)),
                None if filter.children.is_empty() => Ok(None),
                None => Err(RpcError::operation_not_supported(
                    ErrorType::Protocol,
                    "subtree filtering is not supported; use an XPath \
                     filter",
                )),
            }
        }
        None => Ok(None),
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn child<'a>(node: &'a XmlNode, name: &str) -> Option<&'a XmlNode> {
    node.children
        .iter()
        .find(|child| local_name(&child.name) == name)
}

fn child_text(node: &XmlNode, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|child| child.text.as_ref())
        .map(|text| text.trim().to_owned())
}

// ===== XML parsing =====

// Parses an XML document into an element tree.
fn parse_xml(msg: &str) -> std::result::Result<XmlNode, RpcError> {
    let mut reader = Reader::from_str(msg);
    reader.trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                return parse_element(&mut reader, &start);
            }
            Ok(Event::Empty(start)) => {
                return leaf_element(&start);
            }
            Ok(Event::Decl(_))
            | Ok(Event::Comment(_))
            | Ok(Event::PI(_))
            | Ok(Event::Text(_)) => continue,
            Ok(Event::Eof) => {
                return Err(RpcError::malformed_message(
                    "empty or truncated message",
                ));
            }
            Ok(_) => continue,
            Err(error) => {
                return Err(RpcError::malformed_message(error.to_string()));
            }
        }
    }
}

fn parse_element<'a>(
    reader: &mut Reader<&'a [u8]>,
    start: &BytesStart<'a>,
) -> std::result::Result<XmlNode, RpcError> {
    let mut node = leaf_element(start)?;

    loop {
        match reader.read_event() {
            Ok(Event::Start(child_start)) => {
                let child_start = child_start.to_owned();
                node.children
                    .push(parse_element(reader, &child_start)?);
            }
            Ok(Event::Empty(child_start)) => {
                node.children.push(leaf_element(&child_start)?);
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|error| {
                    RpcError::malformed_message(error.to_string())
                })?;
                match &mut node.text {
                    Some(existing) => existing.push_str(&text),
                    None => node.text = Some(text.into_owned()),
                }
            }
            Ok(Event::CData(data)) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                match &mut node.text {
                    Some(existing) => existing.push_str(&text),
                    None => node.text = Some(text),
                }
            }
            Ok(Event::End(_)) => return Ok(node),
            Ok(Event::Eof) => {
                return Err(RpcError::malformed_message(
                    "truncated message",
                ));
            }
            Ok(_) => continue,
            Err(error) => {
                return Err(RpcError::malformed_message(error.to_string()));
            }
        }
    }
}

fn leaf_element(
    start: &BytesStart<'_>,
) -> std::result::Result<XmlNode, RpcError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = XmlNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|error| {
            RpcError::malformed_message(error.to_string())
        })?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|error| {
                RpcError::malformed_message(error.to_string())
            })?
            .into_owned();
        node.attrs.push((name, value));
    }
    Ok(node)
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use lattice_northbound::rpc_error::ErrorTag;

    use super::*;

    #[test]
    fn eom_framing_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&eom_frame("<rpc/>"));
        buf.extend_from_slice(&eom_frame("<rpc2/>"));
        assert_eq!(extract_eom(&mut buf).as_deref(), Some("<rpc/>"));
        assert_eq!(extract_eom(&mut buf).as_deref(), Some("<rpc2/>"));
        assert_eq!(extract_eom(&mut buf), None);
    }

    #[test]
    fn chunked_framing_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&chunked_frame("<rpc/>"));
        assert_eq!(
            extract_chunked(&mut buf).unwrap().as_deref(),
            Some("<rpc/>")
        );
        assert!(buf.is_empty());

        // Incomplete frames ask for more data.
        let mut buf = b"\n#6\n<rp".to_vec();
        assert_eq!(extract_chunked(&mut buf).unwrap(), None);

        // Garbage is rejected.
        let mut buf = b"bogus".to_vec();
        assert!(extract_chunked(&mut buf).is_err());
    }

    #[test]
    fn chunked_multi_chunk_message() {
        let mut buf = b"\n#3\n<rp\n#3\nc/>\n##\n".to_vec();
        assert_eq!(
            extract_chunked(&mut buf).unwrap().as_deref(),
            Some("<rpc/>")
        );
    }

    #[test]
    fn hello_advertises_the_candidate_capability() {
        let hello = hello_message(7);
        assert!(hello.contains(
            "urn:ietf:params:netconf:capability:candidate:1.0"
        ));
        assert!(hello.contains("<session-id>7</session-id>"));
    }

    #[test]
    fn hello_negotiates_chunked_framing() {
        let msg = concat!(
            "<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">",
            "<capabilities>",
            "<capability>urn:ietf:params:netconf:base:1.1</capability>",
            "</capabilities></hello>"
        );
        assert!(parse_hello(msg).unwrap());

        let msg = concat!(
            "<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">",
            "<capabilities>",
            "<capability>urn:ietf:params:netconf:base:1.0</capability>",
            "</capabilities></hello>"
        );
        assert!(!parse_hello(msg).unwrap());
    }

    #[test]
    fn parse_edit_config_rpc() {
        let msg = concat!(
            "<rpc message-id=\"101\" ",
            "xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">",
            "<edit-config><target><candidate/></target>",
            "<config><x xmlns=\"urn:ex\">7</x></config>",
            "</edit-config></rpc>"
        );
        let (message_id, operation) = parse_rpc(msg).unwrap();
        assert_eq!(message_id.as_deref(), Some("101"));
        match operation {
            Operation::EditConfig {
                target,
                default_operation,
                config,
                ..
            } => {
                assert_eq!(target, DatastoreId::Candidate);
                assert_eq!(default_operation, EditOperation::Merge);
                assert_eq!(config, "<x xmlns=\"urn:ex\">7</x>");
            }
            operation => panic!("unexpected operation: {operation:?}"),
        }
    }

    #[test]
    fn parse_confirmed_commit_rpc() {
        let msg = concat!(
            "<rpc message-id=\"2\" ",
            "xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">",
            "<commit><confirmed/>",
            "<confirm-timeout>1</confirm-timeout>",
            "</commit></rpc>"
        );
        let (_, operation) = parse_rpc(msg).unwrap();
        match operation {
            Operation::Commit {
                confirmed,
                confirm_timeout,
                persist,
                persist_id,
            } => {
                assert!(confirmed);
                assert_eq!(confirm_timeout, Some(1));
                assert_eq!(persist, None);
                assert_eq!(persist_id, None);
            }
            operation => panic!("unexpected operation: {operation:?}"),
        }
    }

    #[test]
    fn parse_lock_and_kill_session() {
        let msg = "<rpc><lock><target><running/></target></lock></rpc>";
        let (message_id, operation) = parse_rpc(msg).unwrap();
        assert_eq!(message_id, None);
        assert!(matches!(
            operation,
            Operation::Lock { target: DatastoreId::Running }
        ));

        let msg =
            "<rpc><kill-session><session-id>4</session-id></kill-session>\
             </rpc>";
        let (_, operation) = parse_rpc(msg).unwrap();
        assert!(matches!(
            operation,
            Operation::KillSession { session_id: 4 }
        ));
    }

    #[test]
    fn truncated_message_is_malformed() {
        let error = parse_rpc("<rpc><get-confi").unwrap_err();
        assert_eq!(error.tag, ErrorTag::MalformedMessage);
        assert_eq!(error.error_type, ErrorType::Rpc);

        let reply = reply_error(None, &[error]);
        assert!(reply.contains("<error-type>rpc</error-type>"));
        assert!(
            reply.contains("<error-tag>malformed-message</error-tag>")
        );
    }

    #[test]
    fn unknown_operation_is_not_supported() {
        let error = parse_rpc("<rpc><frobnicate/></rpc>").unwrap_err();
        assert_eq!(error.tag, ErrorTag::OperationNotSupported);
    }

    #[test]
    fn reply_envelopes() {
        assert_eq!(
            reply_ok(Some("101")),
            "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" \
             message-id=\"101\"><ok/></rpc-reply>"
        );
        assert_eq!(
            reply_data(Some("5"), Some("<x xmlns=\"urn:ex\">7</x>")),
            "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" \
             message-id=\"5\"><data><x xmlns=\"urn:ex\">7</x></data>\
             </rpc-reply>"
        );
        assert_eq!(
            reply_data(None, None),
            "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
             <data/></rpc-reply>"
        );
    }
}
