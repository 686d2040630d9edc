//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(type_alias_bounds)]

mod debug;

pub mod api;
pub mod configuration;
pub mod error;
pub mod rpc;
pub mod rpc_error;

use derive_new::new;
use lattice_yang::YANG_CTX;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tracing::Span;
use yang3::data::DataTree;
use yang3::schema::{DataValueType, SchemaNode, SchemaNodeKind};

use crate::debug::Debug;

/// YANG callback operation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum CallbackOp {
    Create,
    Modify,
    Delete,
    Rpc,
}

/// YANG callback key.
#[derive(Clone, Debug, Eq, Hash, new, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct CallbackKey {
    pub path: String,
    pub operation: CallbackOp,
}

//
// Useful type definitions.
//
pub type NbDaemonSender = Sender<api::daemon::Request>;
pub type NbDaemonReceiver = Receiver<api::daemon::Request>;
pub type NbProviderSender = UnboundedSender<api::provider::Notification>;
pub type NbProviderReceiver = UnboundedReceiver<api::provider::Notification>;

/// Base northbound provider trait.
pub trait ProviderBase
where
    Self: 'static + Sized,
{
    fn yang_modules() -> &'static [&'static str];

    fn top_level_node(&self) -> String;

    fn debug_span(name: &str) -> Span;

    // Dynamically generated operational data for the provided path.
    fn get_state(
        &self,
        _path: Option<&str>,
    ) -> Result<DataTree<'static>, error::Error> {
        let yang_ctx = YANG_CTX.get().unwrap();
        Ok(DataTree::new(yang_ctx))
    }
}

// ===== impl CallbackOp =====

impl CallbackOp {
    pub fn is_valid(&self, snode: &SchemaNode<'_>) -> bool {
        match self {
            CallbackOp::Create => CallbackOp::create_is_valid(snode),
            CallbackOp::Modify => CallbackOp::modify_is_valid(snode),
            CallbackOp::Delete => CallbackOp::delete_is_valid(snode),
            CallbackOp::Rpc => CallbackOp::rpc_is_valid(snode),
        }
    }

    fn create_is_valid(snode: &SchemaNode<'_>) -> bool {
        if !snode.is_config() {
            return false;
        }

        match snode.kind() {
            SchemaNodeKind::Leaf => {
                snode.leaf_type().unwrap().base_type() == DataValueType::Empty
            }
            SchemaNodeKind::Container => !snode.is_np_container(),
            SchemaNodeKind::LeafList | SchemaNodeKind::List => true,
            _ => false,
        }
    }

    fn modify_is_valid(snode: &SchemaNode<'_>) -> bool {
        if !snode.is_config() {
            return false;
        }

        match snode.kind() {
            SchemaNodeKind::Leaf => {
                // List keys can't be modified.
                !(snode.leaf_type().unwrap().base_type()
                    == DataValueType::Empty
                    || snode.is_list_key())
            }
            _ => false,
        }
    }

    fn delete_is_valid(snode: &SchemaNode<'_>) -> bool {
        if !snode.is_config() {
            return false;
        }

        match snode.kind() {
            SchemaNodeKind::Leaf => {
                // List keys can't be deleted.
                if snode.is_list_key() {
                    return false;
                }

                // Only optional leaves can be deleted, or leaves whose
                // parent is a case statement.
                if let Some(parent) = snode.ancestors().next() {
                    if parent.kind() == SchemaNodeKind::Case {
                        return true;
                    }
                }
                if snode.whens().next().is_some() {
                    return true;
                }
                if snode.is_mandatory() || snode.has_default() {
                    return false;
                }

                true
            }
            SchemaNodeKind::Container => !snode.is_np_container(),
            SchemaNodeKind::LeafList | SchemaNodeKind::List => true,
            _ => false,
        }
    }

    fn rpc_is_valid(snode: &SchemaNode<'_>) -> bool {
        matches!(snode.kind(), SchemaNodeKind::Rpc | SchemaNodeKind::Action)
    }
}

// ===== helper functions =====

fn process_get_callbacks<Provider>() -> api::daemon::GetCallbacksResponse
where
    Provider: configuration::Provider + rpc::Provider,
{
    let callbacks = [
        <Provider as configuration::Provider>::callbacks().keys(),
        <Provider as rpc::Provider>::callbacks()
            .map(|cbs| cbs.keys())
            .unwrap_or_default(),
    ]
    .into_iter()
    .flat_map(|v| v.into_iter())
    .collect();

    api::daemon::GetCallbacksResponse { callbacks }
}

// ===== global functions =====

// Processes a northbound message coming from the Lattice daemon.
pub fn process_northbound_msg<Provider>(
    provider: &mut Provider,
    resources: &mut Vec<Option<Provider::Resource>>,
    request: api::daemon::Request,
) where
    Provider: configuration::Provider + rpc::Provider,
{
    Debug::RequestRx(&request).log();

    match request {
        api::daemon::Request::GetCallbacks(request) => {
            let response = process_get_callbacks::<Provider>();
            if let Some(responder) = request.responder {
                responder.send(response).unwrap();
            }
        }
        api::daemon::Request::Validate(request) => {
            let response =
                configuration::process_validate(provider, request.config);
            if let Some(responder) = request.responder {
                responder.send(response).unwrap();
            }
        }
        api::daemon::Request::Commit(request) => {
            let response = configuration::process_commit(
                provider,
                request.phase,
                request.old_config,
                request.new_config,
                request.changes,
                resources,
            );
            if let Some(responder) = request.responder {
                responder.send(response).unwrap();
            }
        }
        api::daemon::Request::Get(request) => {
            let response = provider
                .get_state(request.path.as_deref())
                .map(|data| api::daemon::GetResponse { data });
            if let Some(responder) = request.responder {
                responder.send(response).unwrap();
            }
        }
        api::daemon::Request::Rpc(request) => {
            let response = rpc::process_rpc(provider, request.data);
            if let Some(responder) = request.responder {
                responder.send(response).unwrap();
            }
        }
    }
}
