//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use lattice_utils::yang::SchemaNodeExt;
use yang3::data::{Data, DataNodeRef, DataTree};
use yang3::schema::SchemaNodeKind;

use crate::debug::Debug;
use crate::error::Error;
use crate::{CallbackKey, CallbackOp, api};

//
// RPC callbacks.
//

pub struct Callbacks<P: Provider>(pub HashMap<CallbackKey, Callback<P>>);

pub struct CallbacksBuilder<P: Provider> {
    path: Option<&'static str>,
    callbacks: Callbacks<P>,
}

#[derive(Debug)]
pub struct CallbackArgs<'a> {
    pub data: &'a mut DataTree<'static>,
    pub rpc_path: &'a str,
}

pub type Callback<P> =
    for<'a> fn(&'a mut P, CallbackArgs<'a>) -> Result<(), String>;

// Northbound RPC provider.
pub trait Provider: crate::ProviderBase {
    fn callbacks() -> Option<&'static Callbacks<Self>> {
        None
    }
}

// ===== impl Callbacks =====

impl<P> Callbacks<P>
where
    P: Provider,
{
    fn get(&self, key: &CallbackKey) -> Option<&Callback<P>> {
        self.0.get(key)
    }

    pub fn keys(&self) -> Vec<CallbackKey> {
        self.0.keys().cloned().collect()
    }
}

impl<P> Default for Callbacks<P>
where
    P: Provider,
{
    fn default() -> Self {
        Callbacks(HashMap::new())
    }
}

// ===== impl CallbacksBuilder =====

impl<P> CallbacksBuilder<P>
where
    P: Provider,
{
    #[must_use]
    pub fn path(mut self, path: &'static str) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn rpc(mut self, cb: Callback<P>) -> Self {
        let path = self.path.unwrap().to_string();
        let key = CallbackKey::new(path, CallbackOp::Rpc);
        self.callbacks.0.insert(key, cb);
        self
    }

    #[must_use]
    pub fn build(self) -> Callbacks<P> {
        self.callbacks
    }
}

impl<P> Default for CallbacksBuilder<P>
where
    P: Provider,
{
    fn default() -> Self {
        CallbacksBuilder {
            path: None,
            callbacks: Callbacks::default(),
        }
    }
}

// ===== helper functions =====

fn find_rpc<'a>(data: &'a DataTree<'static>) -> Result<DataNodeRef<'a>, Error> {
    data.traverse()
        .find(|dnode| {
            matches!(
                dnode.schema().kind(),
                SchemaNodeKind::Rpc | SchemaNodeKind::Action
            )
        })
        .ok_or(Error::RpcNotFound)
}

// ===== global functions =====

pub(crate) fn process_rpc<P>(
    provider: &mut P,
    mut data: DataTree<'static>,
) -> Result<api::daemon::RpcResponse, Error>
where
    P: Provider,
{
    let rpc = find_rpc(&data)?;
    let rpc_data_path = rpc.path().to_owned();
    let rpc_schema_path = rpc.schema().data_path();
    Debug::RpcCallback(&rpc_data_path).log();

    if let Some(callbacks) = P::callbacks() {
        let key = CallbackKey::new(rpc_schema_path, CallbackOp::Rpc);
        if let Some(cb) = callbacks.get(&key) {
            let args = CallbackArgs {
                data: &mut data,
                rpc_path: &rpc_data_path,
            };
            (*cb)(provider, args).map_err(Error::RpcCallback)?;
        }
    }

    Ok(api::daemon::RpcResponse { data })
}
