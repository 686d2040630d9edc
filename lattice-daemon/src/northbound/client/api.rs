//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use lattice_northbound::rpc_error::RpcError;
use lattice_utils::{Responder, UnboundedSender};
use yang3::data::DataTree;

use crate::northbound::datastore::{DatastoreId, EditOperation};

// External client -> Daemon requests.
pub mod client {
    use super::*;

    #[derive(Debug)]
    pub enum Request {
        // Request to attach a new management session.
        Attach(AttachRequest),
        // Notification that a session has gone away.
        Detach(DetachRequest),
        // Request to execute a NETCONF operation.
        Rpc(RpcRequest),
    }

    #[derive(Debug)]
    pub struct AttachRequest {
        pub username: String,
        pub groups: BTreeSet<String>,
        pub recovery: bool,
        // Signal used by `kill-session` to tear down the transport.
        pub kill_tx: UnboundedSender<()>,
        pub responder: Responder<AttachResponse>,
    }

    #[derive(Debug)]
    pub struct AttachResponse {
        pub session_id: u32,
    }

    #[derive(Debug)]
    pub struct DetachRequest {
        pub session_id: u32,
    }

    #[derive(Debug)]
    pub struct RpcRequest {
        pub session_id: u32,
        pub operation: Operation,
        pub responder: Responder<Result<Reply, Vec<RpcError>>>,
    }

    #[derive(Debug)]
    pub enum Reply {
        Ok,
        Data(DataTree<'static>),
    }

    // ===== impl Request =====

    impl std::fmt::Display for Request {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Request::Attach(_) => write!(f, "Attach"),
                Request::Detach(_) => write!(f, "Detach"),
                Request::Rpc(request) => {
                    write!(f, "Rpc({})", request.operation.rpc_name())
                }
            }
        }
    }
}

// A parsed NETCONF protocol operation.
#[derive(Debug)]
pub enum Operation {
    Get {
        filter: Option<String>,
    },
    GetConfig {
        source: DatastoreId,
        filter: Option<String>,
    },
    EditConfig {
        target: DatastoreId,
        default_operation: EditOperation,
        test_option: TestOption,
        error_option: ErrorOption,
        config: String,
    },
    CopyConfig {
        source: DatastoreId,
        target: DatastoreId,
    },
    DeleteConfig {
        target: DatastoreId,
    },
    Lock {
        target: DatastoreId,
    },
    Unlock {
        target: DatastoreId,
    },
    Commit {
        confirmed: bool,
        confirm_timeout: Option<u32>,
        persist: Option<String>,
        persist_id: Option<String>,
    },
    CancelCommit {
        persist_id: Option<String>,
    },
    DiscardChanges,
    Validate {
        source: DatastoreId,
    },
    CloseSession,
    KillSession {
        session_id: u32,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestOption {
    #[default]
    TestThenSet,
    Set,
    TestOnly,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

// ===== impl Operation =====

impl Operation {
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::GetConfig { .. } => "get-config",
            Operation::EditConfig { .. } => "edit-config",
            Operation::CopyConfig { .. } => "copy-config",
            Operation::DeleteConfig { .. } => "delete-config",
            Operation::Lock { .. } => "lock",
            Operation::Unlock { .. } => "unlock",
            Operation::Commit { .. } => "commit",
            Operation::CancelCommit { .. } => "cancel-commit",
            Operation::DiscardChanges => "discard-changes",
            Operation::Validate { .. } => "validate",
            Operation::CloseSession => "close-session",
            Operation::KillSession { .. } => "kill-session",
        }
    }
}
