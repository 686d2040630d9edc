//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::sync::Arc;

use lattice_utils::yang::SchemaNodeExt;
use serde::{Deserialize, Serialize};
use yang3::data::{Data, DataDiff, DataDiffOp, DataNodeRef, DataTree};
use yang3::schema::SchemaNodeKind;

use crate::api::daemon as api;
use crate::debug::Debug;
use crate::error::Error;
use crate::{CallbackKey, CallbackOp};

// Phases of the two-phase commit protocol.
//
// `Prepare` may fail and is invoked on every provider before anything is
// applied. `Apply` and `Done` are second-phase callbacks; `Abort` undoes a
// successful `Prepare` when a later provider rejected the transaction.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum CommitPhase {
    Prepare,
    Abort,
    Apply,
    Done,
}

//
// Commit callbacks.
//

pub struct Callbacks<P: Provider>(pub HashMap<CallbackKey, CallbacksNode<P>>);

pub struct CallbacksNode<P: Provider> {
    pub prepare: Option<CallbackPhaseOne<P>>,
    pub abort: Option<CallbackPhaseTwo<P>>,
    pub apply: Option<CallbackPhaseTwo<P>>,
    pub done: Option<CallbackPhaseTwo<P>>,
}

pub struct CallbacksBuilder<P: Provider> {
    path: Option<&'static str>,
    callbacks: Callbacks<P>,
}

#[derive(Debug)]
pub struct CallbackArgs<'a, P: Provider> {
    pub resource: &'a mut Option<P::Resource>,
    pub old_config: &'a Arc<DataTree<'static>>,
    pub new_config: &'a Arc<DataTree<'static>>,
    pub dnode: DataNodeRef<'a>,
}

//
// Validation callbacks.
//

#[derive(Default)]
pub struct ValidationCallbacks(pub HashMap<String, ValidationCallback>);

#[derive(Default)]
pub struct ValidationCallbacksBuilder {
    path: Option<&'static str>,
    callbacks: ValidationCallbacks,
}

#[derive(Debug)]
pub struct ValidationCallbackArgs<'a> {
    pub dnode: DataNodeRef<'a>,
}

//
// Useful type definition(s).
//

pub type ConfigChange = (CallbackKey, String);
pub type ConfigChanges = Vec<ConfigChange>;

pub type CallbackPhaseOne<P> =
    for<'a> fn(&'a mut P, CallbackArgs<'a, P>) -> Result<(), String>;

pub type CallbackPhaseTwo<P> = for<'a> fn(&'a mut P, CallbackArgs<'a, P>);

pub type ValidationCallback =
    fn(ValidationCallbackArgs<'_>) -> Result<(), String>;

//
// Provider northbound.
//

pub trait Provider: crate::ProviderBase {
    type Resource: Send;

    fn validation_callbacks() -> Option<&'static ValidationCallbacks> {
        None
    }

    fn callbacks() -> &'static Callbacks<Self>;
}

// ===== impl Callbacks =====

impl<P> Callbacks<P>
where
    P: Provider,
{
    fn get_prepare(&self, key: &CallbackKey) -> Option<&CallbackPhaseOne<P>> {
        self.0.get(key).and_then(|cb_node| cb_node.prepare.as_ref())
    }

    fn get_abort(&self, key: &CallbackKey) -> Option<&CallbackPhaseTwo<P>> {
        self.0.get(key).and_then(|cb_node| cb_node.abort.as_ref())
    }

    fn get_apply(&self, key: &CallbackKey) -> Option<&CallbackPhaseTwo<P>> {
        self.0.get(key).and_then(|cb_node| cb_node.apply.as_ref())
    }

    fn get_done(&self, key: &CallbackKey) -> Option<&CallbackPhaseTwo<P>> {
        self.0.get(key).and_then(|cb_node| cb_node.done.as_ref())
    }

    pub fn keys(&self) -> Vec<CallbackKey> {
        self.0.keys().cloned().collect()
    }
}

impl<P> std::fmt::Debug for Callbacks<P>
where
    P: Provider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callbacks({:?})", self.0.keys())
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

// ===== impl CallbacksNode =====

impl<P> Default for CallbacksNode<P>
where
    P: Provider,
{
    fn default() -> Self {
        CallbacksNode {
            prepare: None,
            abort: None,
            apply: None,
            done: None,
        }
    }
}

// ===== impl CallbacksBuilder =====

impl<P> CallbacksBuilder<P>
where
    P: Provider,
{
    pub fn new(callbacks: Callbacks<P>) -> Self {
        CallbacksBuilder {
            path: None,
            callbacks,
        }
    }

    #[must_use]
    pub fn path(mut self, path: &'static str) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    fn load_prepare(
        mut self,
        operation: CallbackOp,
        cb: CallbackPhaseOne<P>,
    ) -> Self {
        let path = self.path.unwrap().to_string();
        let key = CallbackKey::new(path, operation);
        self.callbacks.0.entry(key).or_default().prepare = Some(cb);
        self
    }

    #[must_use]
    fn load_abort(
        mut self,
        operation: CallbackOp,
        cb: CallbackPhaseTwo<P>,
    ) -> Self {
        let path = self.path.unwrap().to_string();
        let key = CallbackKey::new(path, operation);
        self.callbacks.0.entry(key).or_default().abort = Some(cb);
        self
    }

    #[must_use]
    fn load_apply(
        mut self,
        operation: CallbackOp,
        cb: CallbackPhaseTwo<P>,
    ) -> Self {
        let path = self.path.unwrap().to_string();
        let key = CallbackKey::new(path, operation);
        self.callbacks.0.entry(key).or_default().apply = Some(cb);
        self
    }

    #[must_use]
    fn load_done(
        mut self,
        operation: CallbackOp,
        cb: CallbackPhaseTwo<P>,
    ) -> Self {
        let path = self.path.unwrap().to_string();
        let key = CallbackKey::new(path, operation);
        self.callbacks.0.entry(key).or_default().done = Some(cb);
        self
    }

    #[must_use]
    pub fn create_prepare(self, cb: CallbackPhaseOne<P>) -> Self {
        self.load_prepare(CallbackOp::Create, cb)
    }

    #[must_use]
    pub fn create_abort(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_abort(CallbackOp::Create, cb)
    }

    #[must_use]
    pub fn create_apply(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_apply(CallbackOp::Create, cb)
    }

    #[must_use]
    pub fn create_done(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_done(CallbackOp::Create, cb)
    }

    #[must_use]
    pub fn delete_prepare(self, cb: CallbackPhaseOne<P>) -> Self {
        self.load_prepare(CallbackOp::Delete, cb)
    }

    #[must_use]
    pub fn delete_abort(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_abort(CallbackOp::Delete, cb)
    }

    #[must_use]
    pub fn delete_apply(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_apply(CallbackOp::Delete, cb)
    }

    #[must_use]
    pub fn delete_done(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_done(CallbackOp::Delete, cb)
    }

    #[must_use]
    pub fn modify_prepare(self, cb: CallbackPhaseOne<P>) -> Self {
        self.load_prepare(CallbackOp::Modify, cb)
    }

    #[must_use]
    pub fn modify_abort(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_abort(CallbackOp::Modify, cb)
    }

    #[must_use]
    pub fn modify_apply(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_apply(CallbackOp::Modify, cb)
    }

    #[must_use]
    pub fn modify_done(self, cb: CallbackPhaseTwo<P>) -> Self {
        self.load_done(CallbackOp::Modify, cb)
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

// ===== impl ValidationCallbacks =====

impl ValidationCallbacks {
    fn get(&self, key: &str) -> Option<&ValidationCallback> {
        self.0.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ValidationCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValidationCallbacks({:?})", self.0.keys())
    }
}

// ===== impl ValidationCallbacksBuilder =====

impl ValidationCallbacksBuilder {
    pub fn new(callbacks: ValidationCallbacks) -> Self {
        ValidationCallbacksBuilder {
            path: None,
            callbacks,
        }
    }

    #[must_use]
    pub fn path(mut self, path: &'static str) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn validate(mut self, cb: ValidationCallback) -> Self {
        let path = self.path.unwrap().to_string();
        self.callbacks.0.insert(path, cb);
        self
    }

    #[must_use]
    pub fn build(self) -> ValidationCallbacks {
        self.callbacks
    }
}

// ===== helper functions =====

fn invoke_callback<P>(
    provider: &mut P,
    phase: CommitPhase,
    old_config: &Arc<DataTree<'static>>,
    new_config: &Arc<DataTree<'static>>,
    cb_key: &CallbackKey,
    data_path: &str,
    resource: &mut Option<P::Resource>,
) -> Result<(), Error>
where
    P: Provider,
{
    Debug::ConfigurationCallback(phase, cb_key.operation, &cb_key.path).log();

    let callbacks = P::callbacks();

    // Get data node that is being created, modified or deleted.
    let dnode_config = match cb_key.operation {
        CallbackOp::Create | CallbackOp::Modify => new_config,
        CallbackOp::Delete => old_config,
        _ => unreachable!(),
    };
    let dnode = dnode_config.find_path(data_path).unwrap();

    // Fill-in callback arguments.
    let args = CallbackArgs {
        resource,
        old_config,
        new_config,
        dnode,
    };

    match phase {
        CommitPhase::Prepare => {
            // Invoke 1st-phase commit callback.
            if let Some(cb) = callbacks.get_prepare(cb_key) {
                (*cb)(provider, args).map_err(Error::CfgCallback)?;
            }
        }
        CommitPhase::Abort => {
            // Invoke 2nd-phase commit callback.
            if let Some(cb) = callbacks.get_abort(cb_key) {
                (*cb)(provider, args);
            }
        }
        CommitPhase::Apply => {
            // Invoke 2nd-phase commit callback.
            if let Some(cb) = callbacks.get_apply(cb_key) {
                (*cb)(provider, args);
            }
        }
        CommitPhase::Done => {
            // Invoke post-commit callback (best-effort).
            if let Some(cb) = callbacks.get_done(cb_key) {
                (*cb)(provider, args);
            }
        }
    }

    Ok(())
}

fn validate_configuration<P>(
    provider: &P,
    config: &Arc<DataTree<'static>>,
) -> Result<(), Error>
where
    P: Provider,
{
    if let Some(callbacks) = P::validation_callbacks() {
        for dnode in config
            .find_xpath(&provider.top_level_node())
            .into_iter()
            .flatten()
            .flat_map(|dnode| dnode.traverse())
        {
            if let Some(cb) = callbacks.get(&dnode.schema().data_path()) {
                let path = dnode.path();
                Debug::ValidationCallback(&path).log();

                // Invoke validation callback.
                let args = ValidationCallbackArgs { dnode };
                (*cb)(args).map_err(Error::ValidationCallback)?;
            }
        }
    }

    Ok(())
}

// ===== global functions =====

pub fn changes_from_diff(diff: &DataDiff<'static>) -> ConfigChanges {
    let mut changes = vec![];

    for (op, dnode) in diff.iter() {
        match op {
            DataDiffOp::Create => {
                for dnode in dnode.traverse() {
                    if dnode.is_default() {
                        continue;
                    }

                    let snode = dnode.schema();
                    let operation = if CallbackOp::Create.is_valid(&snode) {
                        CallbackOp::Create
                    } else if CallbackOp::Modify.is_valid(&snode) {
                        CallbackOp::Modify
                    } else {
                        continue;
                    };

                    let cb_key =
                        CallbackKey::new(dnode.schema().data_path(), operation);
                    changes.push((cb_key, dnode.path().to_owned()));
                }
            }
            DataDiffOp::Delete => {
                let snode = dnode.schema();
                if CallbackOp::Delete.is_valid(&snode) {
                    let cb_key = CallbackKey::new(
                        dnode.schema().data_path(),
                        CallbackOp::Delete,
                    );
                    changes.push((cb_key, dnode.path().to_owned()));
                    continue;
                }

                // NP-containers.
                for dnode in dnode.traverse() {
                    let snode = dnode.schema();
                    if !CallbackOp::Delete.is_valid(&snode) {
                        continue;
                    }

                    let cb_key = CallbackKey::new(
                        dnode.schema().data_path(),
                        CallbackOp::Delete,
                    );
                    changes.push((cb_key, dnode.path().to_owned()));
                }
            }
            DataDiffOp::Replace => {
                let snode = dnode.schema();
                if !CallbackOp::Modify.is_valid(&snode) {
                    continue;
                }

                let cb_key = CallbackKey::new(
                    dnode.schema().data_path(),
                    CallbackOp::Modify,
                );
                changes.push((cb_key, dnode.path().to_owned()));
            }
        }
    }

    changes
}

pub(crate) fn process_validate<P>(
    provider: &P,
    config: Arc<DataTree<'static>>,
) -> Result<api::ValidateResponse, Error>
where
    P: Provider,
{
    validate_configuration::<P>(provider, &config)?;
    Ok(api::ValidateResponse {})
}

pub(crate) fn process_commit<P>(
    provider: &mut P,
    phase: CommitPhase,
    old_config: Arc<DataTree<'static>>,
    new_config: Arc<DataTree<'static>>,
    changes: ConfigChanges,
    resources: &mut Vec<Option<P::Resource>>,
) -> Result<api::CommitResponse, Error>
where
    P: Provider,
{
    // Resize the resources vector to match the number of configuration
    // changes.
    if phase == CommitPhase::Prepare {
        resources.resize_with(changes.len(), Default::default);
    }

    // An aborted transaction is undone in reverse order, so that resources
    // are released in the opposite order of their allocation.
    let ordered: Vec<_> = match phase {
        CommitPhase::Abort => changes.iter().zip(resources).rev().collect(),
        _ => changes.iter().zip(resources).collect(),
    };

    for ((cb_key, data_path), resource) in ordered {
        let result = invoke_callback(
            provider,
            phase,
            &old_config,
            &new_config,
            cb_key,
            data_path,
            resource,
        );
        match phase {
            CommitPhase::Prepare => result?,
            // 2nd-phase callbacks can't fail.
            CommitPhase::Abort | CommitPhase::Apply | CommitPhase::Done => {}
        }
    }

    Ok(api::CommitResponse {})
}
